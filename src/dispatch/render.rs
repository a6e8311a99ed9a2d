//! Render thread - single owner of the preview surface.
//!
//! Every user-visible presentation is marshaled onto one dedicated thread.
//! The surface is built on that thread and never leaves it.
//!
//! # Hand-off policy
//!
//! Results waiting to be previewed share a single slot (last writer wins):
//!
//! ```text
//! hand_off(seq 4) ─┐
//! hand_off(seq 6) ─┼─► [slot: seq 6] ──Present──► surface.preview()
//! hand_off(seq 5) ─┘   (5 < 6, dropped)
//! ```
//!
//! A result older than the one already presented is discarded as stale.
//! Panics inside the surface become [`PreviewError`] notices.

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    thread::JoinHandle,
};

use anyhow::Result;
use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;

use super::collab::{ErrorNotice, PreviewError, PreviewSurface};
use crate::channel::EvalResult;

type Invocation = Box<dyn FnOnce(&mut dyn PreviewSurface) + Send>;

enum RenderJob {
    /// Present whatever is in the hand-off slot.
    Present,
    Notify(ErrorNotice),
    Invoke(Invocation),
    Stop,
}

/// A result waiting for the render thread.
struct Handoff {
    seq: u64,
    result: EvalResult,
}

/// Cloneable handle for scheduling work on the render thread.
#[derive(Clone)]
pub struct RenderScheduler {
    tx: Sender<RenderJob>,
    slot: Arc<Mutex<Option<Handoff>>>,
}

impl RenderScheduler {
    /// Spawn the render thread; `make_surface` runs on it.
    pub fn start<S, F>(make_surface: F) -> Result<(Self, JoinHandle<()>)>
    where
        S: PreviewSurface + 'static,
        F: FnOnce() -> S + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let slot = Arc::new(Mutex::new(None));

        let thread_slot = Arc::clone(&slot);
        let handle = std::thread::Builder::new()
            .name("render".into())
            .spawn(move || {
                let mut surface = make_surface();
                render_loop(&mut surface, &rx, &thread_slot);
            })?;

        Ok((Self { tx, slot }, handle))
    }

    /// Queue a rendered result for preview, replacing any pending one.
    pub fn hand_off(&self, seq: u64, result: EvalResult) {
        {
            let mut slot = self.slot.lock();
            if let Some(pending) = slot.as_ref()
                && pending.seq > seq
            {
                crate::debug!("render"; "dropping stale result {} for {}", result.id, result.full_name);
                return;
            }
            *slot = Some(Handoff { seq, result });
        }
        self.submit(RenderJob::Present);
    }

    /// Show an error or informational notice.
    pub fn notify(&self, notice: ErrorNotice) {
        self.submit(RenderJob::Notify(notice));
    }

    /// Run `f` on the render thread and wait for its value.
    ///
    /// Must not be called from the render thread itself.
    pub fn invoke<R, F>(&self, f: F) -> Result<R, PreviewError>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn PreviewSurface) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = bounded(1);
        let job: Invocation = Box::new(move |surface| {
            let _ = reply_tx.send(f(surface));
        });
        self.tx
            .send(RenderJob::Invoke(job))
            .map_err(|_| PreviewError::Stopped)?;
        // A panicking job drops the sender without replying
        reply_rx
            .recv()
            .map_err(|_| PreviewError::Panicked("render job did not complete".into()))
    }

    /// Ask the render thread to exit after queued work.
    pub fn stop(&self) {
        let _ = self.tx.send(RenderJob::Stop);
    }

    fn submit(&self, job: RenderJob) {
        if self.tx.send(job).is_err() {
            crate::log!("render"; "render thread has stopped");
        }
    }
}

fn render_loop(
    surface: &mut dyn PreviewSurface,
    rx: &Receiver<RenderJob>,
    slot: &Mutex<Option<Handoff>>,
) {
    let mut presented: Option<u64> = None;

    for job in rx.iter() {
        match job {
            RenderJob::Present => {
                let Some(handoff) = slot.lock().take() else {
                    continue;
                };
                if presented.is_some_and(|last| handoff.seq < last) {
                    crate::debug!("render"; "skipping stale result {}", handoff.result.id);
                    continue;
                }
                presented = Some(handoff.seq);
                present(surface, &handoff.result);
            }
            RenderJob::Notify(notice) => notify(surface, &notice),
            RenderJob::Invoke(job) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| job(&mut *surface))) {
                    crate::log!("render"; "render job panicked: {}", panic_message(&*panic));
                }
            }
            RenderJob::Stop => break,
        }
        if crate::core::is_shutdown() {
            break;
        }
    }
}

fn present(surface: &mut dyn PreviewSurface, result: &EvalResult) {
    let error = match catch_unwind(AssertUnwindSafe(|| surface.preview(result))) {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(panic) => PreviewError::Panicked(panic_message(&*panic)),
    };
    crate::debug!("render"; "preview of {} failed: {}", result.full_name, error);
    notify(surface, &ErrorNotice::preview_failed(&result.full_name, &error));
}

fn notify(surface: &mut dyn PreviewSurface, notice: &ErrorNotice) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| surface.notify_error(notice))) {
        crate::log!("render"; "error notice for {} panicked: {}", notice.full_name, panic_message(&*panic));
    }
}

pub(super) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EvalRequest;
    use crate::dispatch::collab::NoticeKind;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Event {
        Preview(String),
        Notice(NoticeKind, String),
    }

    struct Recorder {
        events: Sender<Event>,
        panic_on: Option<&'static str>,
    }

    impl PreviewSurface for Recorder {
        fn preview(&mut self, result: &EvalResult) -> Result<(), PreviewError> {
            if self.panic_on == Some(result.id.as_str()) {
                panic!("surface exploded");
            }
            let _ = self.events.send(Event::Preview(result.id.clone()));
            Ok(())
        }

        fn notify_error(&mut self, notice: &ErrorNotice) {
            let _ = self.events.send(Event::Notice(notice.kind, notice.message.clone()));
        }
    }

    fn start(panic_on: Option<&'static str>) -> (RenderScheduler, Receiver<Event>, JoinHandle<()>) {
        let (tx, rx) = unbounded();
        let (scheduler, handle) = RenderScheduler::start(move || Recorder {
            events: tx,
            panic_on,
        })
        .unwrap();
        (scheduler, rx, handle)
    }

    fn rendered(id: &str) -> EvalResult {
        EvalResult::rendered(&EvalRequest::new(id, "Demo.Page", "class Page1 {}"), json!(id))
    }

    fn next(rx: &Receiver<Event>) -> Event {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_hand_off_previews() {
        let (scheduler, rx, handle) = start(None);
        scheduler.hand_off(1, rendered("a"));
        assert_eq!(next(&rx), Event::Preview("a".into()));

        scheduler.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_stale_hand_off_is_dropped() {
        let (scheduler, rx, handle) = start(None);
        // Block the render thread so both hand-offs meet in the slot
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let blocker = scheduler.clone();
        let waiter = std::thread::spawn(move || {
            blocker.invoke(move |_| {
                let _ = gate_rx.recv();
            })
        });
        std::thread::sleep(Duration::from_millis(50));

        scheduler.hand_off(6, rendered("newer"));
        scheduler.hand_off(5, rendered("older"));
        gate_tx.send(()).unwrap();
        waiter.join().unwrap().unwrap();

        assert_eq!(next(&rx), Event::Preview("newer".into()));
        scheduler.stop();
        handle.join().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_pending_hand_off_is_replaced() {
        let (scheduler, rx, handle) = start(None);
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let blocker = scheduler.clone();
        let waiter = std::thread::spawn(move || {
            blocker.invoke(move |_| {
                let _ = gate_rx.recv();
            })
        });
        std::thread::sleep(Duration::from_millis(50));

        scheduler.hand_off(1, rendered("first"));
        scheduler.hand_off(2, rendered("second"));
        gate_tx.send(()).unwrap();
        waiter.join().unwrap().unwrap();

        assert_eq!(next(&rx), Event::Preview("second".into()));
        scheduler.stop();
        handle.join().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_preview_panic_becomes_notice() {
        let (scheduler, rx, handle) = start(Some("boom"));
        scheduler.hand_off(1, rendered("boom"));

        match next(&rx) {
            Event::Notice(kind, message) => {
                assert_eq!(kind, NoticeKind::PreviewFailed);
                assert!(message.contains("surface exploded"));
            }
            other => panic!("expected notice, got {other:?}"),
        }

        // The thread survives and keeps presenting
        scheduler.hand_off(2, rendered("ok"));
        assert_eq!(next(&rx), Event::Preview("ok".into()));
        scheduler.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_invoke_returns_value() {
        let (scheduler, _rx, handle) = start(None);
        assert_eq!(scheduler.invoke(|_| 42).unwrap(), 42);

        scheduler.stop();
        handle.join().unwrap();
        assert!(matches!(scheduler.invoke(|_| ()), Err(PreviewError::Stopped)));
    }
}
