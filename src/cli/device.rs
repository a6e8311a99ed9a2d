//! `hotview device` - the device side.
//!
//! Reads the host endpoint once from the packaged configuration, connects
//! and serves `eval-request`s until Ctrl+C. A lost connection is
//! re-established up to `[device] reconnect_attempts` times before the
//! command gives up.

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver};

use crate::{
    channel::DeviceChannel,
    config::{DeviceEndpoint, HotConfig, ReconnectPolicy},
    core::{is_shutdown, register_shutdown},
    debug,
    dispatch::{CommandEvaluator, EvalDispatcher, RenderScheduler, TerminalPreview},
    log,
};

/// How often the supervisor checks the connection.
const WATCH_INTERVAL: Duration = Duration::from_millis(200);

pub fn device(config: &HotConfig, package: Option<&Path>) -> Result<()> {
    let endpoint = match package {
        Some(path) => DeviceEndpoint::from_package(path),
        None => config.device.endpoint(),
    }
    .inspect_err(|e| log!("device"; "cannot read host endpoint: {}", e))?;

    let (scheduler, render) = RenderScheduler::start(|| TerminalPreview)?;
    let evaluator = Arc::new(CommandEvaluator::new(config.evaluator.command.clone()));
    let (dispatcher, handle) = EvalDispatcher::new(evaluator, scheduler.clone());

    let inbound = handle.clone();
    let device = DeviceChannel::new(move |message| inbound.deliver(message));
    device
        .connect(&endpoint.host, endpoint.port)
        .with_context(|| format!("failed to reach host {}:{}", endpoint.host, endpoint.port))?;
    log!("device"; "connected to {}:{}", endpoint.host, endpoint.port);

    let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
    register_shutdown(shutdown_tx);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let outbound = device.clone();
    let supervised = device.clone();
    let policy = config.device.reconnect();
    rt.block_on(async move {
        let actor = tokio::spawn(dispatcher.run(move |message| {
            if let Err(e) = outbound.send(&message) {
                log!("device"; "failed to reply to {}: {}", message.id, e);
            }
        }));

        let _ = tokio::task::spawn_blocking(move || {
            supervise(&supervised, &endpoint, policy, &shutdown_rx)
        })
        .await;

        handle.shutdown();
        let _ = actor.await;
    });

    device.close();
    scheduler.stop();
    let _ = render.join();
    Ok(())
}

/// Keep `device` connected until shutdown or until reconnecting fails.
fn supervise(
    device: &DeviceChannel,
    endpoint: &DeviceEndpoint,
    policy: ReconnectPolicy,
    shutdown: &Receiver<()>,
) {
    loop {
        while device.is_open() {
            if stopping(shutdown, WATCH_INTERVAL) {
                return;
            }
        }
        log!("device"; "connection to host lost");
        if !reconnect(device, endpoint, policy, shutdown) {
            return;
        }
    }
}

/// Redial the host with the configured policy.
///
/// Returns false when shutdown arrived or every attempt failed.
fn reconnect(
    device: &DeviceChannel,
    endpoint: &DeviceEndpoint,
    policy: ReconnectPolicy,
    shutdown: &Receiver<()>,
) -> bool {
    for attempt in 1..=policy.attempts {
        if stopping(shutdown, policy.delay) {
            return false;
        }
        match device.connect(&endpoint.host, endpoint.port) {
            Ok(()) => {
                log!("device"; "reconnected to {}:{}", endpoint.host, endpoint.port);
                return true;
            }
            Err(e) => debug!("device"; "reconnect {}/{} failed: {}", attempt, policy.attempts, e),
        }
    }
    log!("device"; "giving up after {} reconnect attempts", policy.attempts);
    false
}

/// Wait up to `timeout` for a shutdown signal.
fn stopping(shutdown: &Receiver<()>, timeout: Duration) -> bool {
    match shutdown.recv_timeout(timeout) {
        Ok(()) => true,
        Err(channel::RecvTimeoutError::Timeout) => is_shutdown(),
        Err(channel::RecvTimeoutError::Disconnected) => {
            std::thread::sleep(timeout);
            is_shutdown()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::server::HostListener;
    use std::net::{IpAddr, Ipv4Addr};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn policy(attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            attempts,
            delay: Duration::from_millis(20),
        }
    }

    fn endpoint(port: u16) -> DeviceEndpoint {
        DeviceEndpoint {
            host: "127.0.0.1".into(),
            port,
        }
    }

    #[test]
    fn test_reconnects_after_host_drops() {
        let listener = HostListener::bind(LOCALHOST, 0).unwrap();
        let port = listener.port();
        let host = std::thread::spawn(move || {
            let first = listener.accept(|_| {}).unwrap();
            first.close();
            listener.accept(|_| {}).unwrap()
        });

        let device = DeviceChannel::new(|_| {});
        device.connect("127.0.0.1", port).unwrap();
        let (tx, shutdown) = channel::bounded(1);

        let watched = device.clone();
        let supervisor = std::thread::spawn(move || {
            supervise(&watched, &endpoint(port), policy(50), &shutdown)
        });

        let second = host.join().unwrap();
        assert!(second.is_open());
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !device.is_open() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(device.is_open());

        tx.send(()).unwrap();
        supervisor.join().unwrap();
        second.close();
        device.close();
    }

    #[test]
    fn test_reconnect_gives_up() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let device = DeviceChannel::new(|_| {});
        let (_tx, shutdown) = channel::bounded(1);
        assert!(!reconnect(&device, &endpoint(port), policy(3), &shutdown));
        assert!(!device.is_open());
    }

    #[test]
    fn test_reconnect_stops_on_shutdown() {
        let device = DeviceChannel::new(|_| {});
        let (tx, shutdown) = channel::bounded(1);
        tx.send(()).unwrap();
        assert!(!reconnect(&device, &endpoint(1), policy(3), &shutdown));
    }

    #[test]
    fn test_supervise_returns_on_shutdown() {
        let listener = HostListener::bind(LOCALHOST, 0).unwrap();
        let port = listener.port();
        let host = std::thread::spawn(move || listener.accept(|_| {}).unwrap());

        let device = DeviceChannel::new(|_| {});
        device.connect("127.0.0.1", port).unwrap();
        let _host = host.join().unwrap();

        let (tx, shutdown) = channel::bounded(1);
        tx.send(()).unwrap();
        supervise(&device, &endpoint(port), policy(3), &shutdown);
        assert!(device.is_open());
        device.close();
    }
}
