//! Host-side listener for device connections.
//!
//! Binds the serve endpoint, accepts devices and upgrades each connection to
//! a [`DeviceChannel`]. Ports already in use are skipped by probing upwards.
//! A peer that does not finish its handshake within the handshake timeout is
//! dropped so it cannot hold up the devices queued behind it.

use std::{
    net::{IpAddr, SocketAddr, TcpListener},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;

use super::{ChannelError, DeviceChannel, MessageCallback};
use crate::{channel::WireMessage, config::ServeConfig};

/// Maximum port retry attempts
const MAX_PORT_RETRIES: u16 = 10;

pub struct HostListener {
    listener: TcpListener,
    port: u16,
    handshake_timeout: Duration,
}

impl HostListener {
    /// Bind `interface:port`, moving to the next port while the current one is taken.
    pub fn bind(interface: IpAddr, base_port: u16) -> Result<Self> {
        let (listener, port) = try_bind_port(interface, base_port, MAX_PORT_RETRIES)?;
        Ok(Self {
            listener,
            port,
            handshake_timeout: ServeConfig::default().handshake_timeout(),
        })
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Block until one device connects and completes the handshake.
    pub fn accept(
        &self,
        callback: impl Fn(WireMessage) + Send + Sync + 'static,
    ) -> Result<DeviceChannel, ChannelError> {
        let (stream, addr) = self
            .listener
            .accept()
            .map_err(|e| ChannelError::Stream(tungstenite::Error::Io(e)))?;
        upgrade(stream, addr, Arc::new(callback), self.handshake_timeout)
    }

    /// Accept devices on a background thread until shutdown.
    ///
    /// Every new connection is handed to `on_channel`; the owner decides
    /// whether it replaces a previous one.
    pub fn spawn_acceptor(
        self,
        callback: MessageCallback,
        mut on_channel: impl FnMut(DeviceChannel) + Send + 'static,
    ) -> Result<std::thread::JoinHandle<()>> {
        self.listener.set_nonblocking(true)?;

        let handle = std::thread::Builder::new()
            .name("channel-acceptor".into())
            .spawn(move || {
                while !crate::core::is_shutdown() {
                    match self.listener.accept() {
                        Ok((stream, addr)) => {
                            // Set blocking for the handshake
                            let _ = stream.set_nonblocking(false);
                            match upgrade(stream, addr, Arc::clone(&callback), self.handshake_timeout) {
                                Ok(channel) => on_channel(channel),
                                Err(e) => crate::log!("channel"; "rejected {}: {}", addr, e),
                            }
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            std::thread::sleep(Duration::from_millis(100));
                        }
                        Err(e) => {
                            crate::log!("channel"; "accept error: {}", e);
                            std::thread::sleep(Duration::from_millis(100));
                        }
                    }
                }
            })?;
        Ok(handle)
    }
}

fn upgrade(
    stream: std::net::TcpStream,
    addr: SocketAddr,
    callback: MessageCallback,
    timeout: Duration,
) -> Result<DeviceChannel, ChannelError> {
    let _ = stream.set_nodelay(true);
    let io_err = |e: std::io::Error| ChannelError::Stream(tungstenite::Error::Io(e));
    // Zero is rejected by set_read_timeout
    let timeout = Some(timeout.max(Duration::from_millis(1)));
    stream.set_read_timeout(timeout).map_err(io_err)?;
    stream.set_write_timeout(timeout).map_err(io_err)?;

    let ws = tungstenite::accept(stream).map_err(|e| ChannelError::Handshake {
        addr: addr.to_string(),
        message: e.to_string(),
    })?;
    ws.get_ref().set_read_timeout(None).map_err(io_err)?;
    ws.get_ref().set_write_timeout(None).map_err(io_err)?;

    crate::debug!("channel"; "device connected: {}", addr);
    let channel = DeviceChannel::with_callback(callback);
    channel.attach(ws)?;
    Ok(channel)
}

// =============================================================================
// Helpers
// =============================================================================

/// Try binding to port, retry with incremented port if in use
fn try_bind_port(interface: IpAddr, base_port: u16, max_retries: u16) -> Result<(TcpListener, u16)> {
    let mut last_error = None;

    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        match TcpListener::bind(SocketAddr::new(interface, port)) {
            Ok(listener) => {
                let actual_port = listener.local_addr()?.port();
                return Ok((listener, actual_port));
            }
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        }
    }

    Err(anyhow::anyhow!(
        "failed to bind {} after {} attempts: {}",
        interface,
        max_retries,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpStream};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_bind_skips_taken_port() {
        let first = HostListener::bind(LOCALHOST, 0).unwrap();
        let taken = first.port();

        let second = HostListener::bind(LOCALHOST, taken).unwrap();
        assert_ne!(second.port(), taken);
        assert!(second.port() > taken);
    }

    #[test]
    fn test_local_addr_uses_interface() {
        let listener = HostListener::bind(LOCALHOST, 0).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(addr.ip(), LOCALHOST);
        assert_eq!(addr.port(), listener.port());
    }

    #[test]
    fn test_stalled_handshake_does_not_block_next_device() {
        let listener = HostListener::bind(LOCALHOST, 0)
            .unwrap()
            .with_handshake_timeout(Duration::from_millis(100));
        let port = listener.port();

        // connects but never sends the upgrade request
        let _stalled = TcpStream::connect((LOCALHOST, port)).unwrap();
        let host = std::thread::spawn(move || {
            let first = listener.accept(|_| {});
            let second = listener.accept(|_| {}).unwrap();
            (first, second)
        });

        let device = DeviceChannel::new(|_| {});
        device.connect("127.0.0.1", port).unwrap();

        let (first, second) = host.join().unwrap();
        assert!(matches!(first, Err(ChannelError::Handshake { .. })));
        assert!(second.is_open());
        assert!(device.is_open());
    }
}
