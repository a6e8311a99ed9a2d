//! Tests for the dispatcher actor, driven by scripted evaluators.

use std::{
    net::{IpAddr, Ipv4Addr},
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, Sender, unbounded};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::*;
use crate::channel::{DeviceChannel, MessageKind, server::HostListener};

const TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Debug, PartialEq)]
enum Event {
    Preview(String),
    Notice(NoticeKind, String),
}

struct Recorder {
    events: Sender<Event>,
}

impl PreviewSurface for Recorder {
    fn preview(&mut self, result: &EvalResult) -> Result<(), PreviewError> {
        let _ = self.events.send(Event::Preview(result.id.clone()));
        Ok(())
    }

    fn notify_error(&mut self, notice: &ErrorNotice) {
        let _ = self.events.send(Event::Notice(notice.kind, notice.message.clone()));
    }
}

/// Evaluator answering from a closure.
struct Scripted<F>(F);

impl<F> Evaluator for Scripted<F>
where
    F: Fn(&EvalRequest, &RenderScheduler, &CancelToken) -> Result<EvalResult, EvaluationError>
        + Send
        + Sync,
{
    fn evaluate(
        &self,
        request: &EvalRequest,
        scheduler: &RenderScheduler,
        token: &CancelToken,
    ) -> Result<EvalResult, EvaluationError> {
        (self.0)(request, scheduler, token)
    }
}

fn scripted<F>(f: F) -> Scripted<F>
where
    F: Fn(&EvalRequest, &RenderScheduler, &CancelToken) -> Result<EvalResult, EvaluationError>
        + Send
        + Sync,
{
    Scripted(f)
}

struct Harness {
    handle: DispatchHandle,
    replies: mpsc::UnboundedReceiver<WireMessage>,
    events: Receiver<Event>,
    scheduler: RenderScheduler,
    render: Option<JoinHandle<()>>,
}

impl Harness {
    fn start(evaluator: impl Evaluator + 'static) -> Self {
        let (events_tx, events) = unbounded();
        let (scheduler, render) =
            RenderScheduler::start(move || Recorder { events: events_tx }).unwrap();

        let (dispatcher, handle) = EvalDispatcher::new(Arc::new(evaluator), scheduler.clone());
        let (reply_tx, replies) = mpsc::unbounded_channel();
        tokio::spawn(dispatcher.run(move |m| {
            let _ = reply_tx.send(m);
        }));

        Self {
            handle,
            replies,
            events,
            scheduler,
            render: Some(render),
        }
    }

    fn request(&self, id: &str, full_name: &str, source: &str) {
        self.handle
            .deliver(WireMessage::from(&EvalRequest::new(id, full_name, source)));
    }

    async fn reply(&mut self) -> EvalResult {
        let message = tokio::time::timeout(TIMEOUT, self.replies.recv())
            .await
            .expect("reply timed out")
            .expect("dispatcher stopped");
        assert_eq!(message.kind, MessageKind::EvalResult);
        EvalResult::try_from(message).unwrap()
    }

    fn event(&self) -> Event {
        self.events.recv_timeout(TIMEOUT).expect("no surface event")
    }

    /// Stop the render thread and return any events not yet consumed.
    fn finish(mut self) -> Vec<Event> {
        self.handle.shutdown();
        self.scheduler.stop();
        if let Some(render) = self.render.take() {
            render.join().unwrap();
        }
        self.events.try_iter().collect()
    }
}

fn echo() -> impl Evaluator {
    scripted(|request, _, _| Ok(EvalResult::rendered(request, json!(request.source))))
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_rendered_result_is_previewed_and_replied() {
    let mut harness = Harness::start(echo());
    harness.request("1", "Demo.MainPage", "class MainPage1 {}");

    let result = harness.reply().await;
    assert_eq!(result.id, "1");
    assert_eq!(result.full_name, "Demo.MainPage");
    assert_eq!(result.outcome, EvalOutcome::Rendered(json!("class MainPage1 {}")));
    assert_eq!(harness.event(), Event::Preview("1".into()));

    assert!(harness.finish().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_result_goes_to_notice_never_preview() {
    let mut harness = Harness::start(scripted(
        |request: &EvalRequest, _: &RenderScheduler, _: &CancelToken| {
            Ok(EvalResult::no_result(request, "assigned Title"))
        },
    ));
    harness.request("1", "Demo.MainPage", "Title = \"x\";");

    let result = harness.reply().await;
    assert!(!result.has_result());
    assert_eq!(
        harness.event(),
        Event::Notice(NoticeKind::NothingToShow, "assigned Title".into())
    );

    let rest = harness.finish();
    assert!(!rest.iter().any(|e| matches!(e, Event::Preview(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_undecodable_messages_are_dropped() {
    let mut harness = Harness::start(echo());

    // Wrong kind, then a request without source
    let mut wrong_kind = WireMessage::from(&EvalRequest::new("a", "Demo.A", "class A1 {}"));
    wrong_kind.kind = MessageKind::EvalResult;
    harness.handle.deliver(wrong_kind);
    let mut no_source = WireMessage::from(&EvalRequest::new("b", "Demo.B", "class B1 {}"));
    no_source.source = None;
    harness.handle.deliver(no_source);

    harness.request("c", "Demo.C", "class C1 {}");

    assert_eq!(harness.reply().await.id, "c");
    assert!(harness.replies.try_recv().is_err());
    harness.finish();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_evaluation_error_is_replied() {
    let mut harness = Harness::start(scripted(
        |_: &EvalRequest, _: &RenderScheduler, _: &CancelToken| {
            Err(EvaluationError::Failed("CS0103: name does not exist".into()))
        },
    ));
    harness.request("9", "Demo.MainPage", "class MainPage1 {}");

    let result = harness.reply().await;
    assert_eq!(result.id, "9");
    assert_eq!(
        result.outcome,
        EvalOutcome::Failed {
            error: "CS0103: name does not exist".into()
        }
    );
    assert!(matches!(
        harness.event(),
        Event::Notice(NoticeKind::EvaluationFailed, _)
    ));
    harness.finish();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_evaluator_panic_is_replied() {
    let mut harness = Harness::start(scripted(
        |_: &EvalRequest, _: &RenderScheduler, _: &CancelToken| -> Result<EvalResult, EvaluationError> {
            panic!("evaluator blew up")
        },
    ));
    harness.request("1", "Demo.MainPage", "class MainPage1 {}");

    let result = harness.reply().await;
    let EvalOutcome::Failed { error } = result.outcome else {
        panic!("expected failure");
    };
    assert!(error.contains("evaluator blew up"));
    harness.finish();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reply_keeps_request_correlation() {
    let mut harness = Harness::start(scripted(
        |_: &EvalRequest, _: &RenderScheduler, _: &CancelToken| {
            let other = EvalRequest::new("wrong", "Other.View", "class X {}");
            Ok(EvalResult::rendered(&other, json!(1)))
        },
    ));
    harness.request("42", "Demo.MainPage", "class MainPage1 {}");

    let result = harness.reply().await;
    assert_eq!(result.id, "42");
    assert_eq!(result.full_name, "Demo.MainPage");
    harness.finish();
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_newer_request_cancels_older() {
    let mut harness = Harness::start(scripted(
        |request: &EvalRequest, _: &RenderScheduler, token: &CancelToken| {
            if request.id == "slow" {
                let deadline = Instant::now() + TIMEOUT;
                while !token.is_cancelled() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
            Ok(EvalResult::rendered(request, json!(request.id)))
        },
    ));
    harness.request("slow", "Demo.MainPage", "class MainPage1 {}");
    harness.request("fast", "Demo.MainPage", "class MainPage2 {}");

    let mut replies = vec![harness.reply().await, harness.reply().await];
    replies.sort_by(|a, b| a.id.cmp(&b.id));

    assert_eq!(replies[0].id, "fast");
    assert!(replies[0].has_result());
    assert_eq!(replies[1].id, "slow");
    assert_eq!(
        replies[1].outcome,
        EvalOutcome::Failed {
            error: EvaluationError::Cancelled.to_string()
        }
    );

    assert_eq!(harness.event(), Event::Preview("fast".into()));
    let rest = harness.finish();
    assert!(!rest.contains(&Event::Preview("slow".into())));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_different_views_evaluate_independently() {
    let mut harness = Harness::start(echo());
    harness.request("1", "Demo.A", "class A1 {}");
    harness.request("2", "Demo.B", "class B1 {}");

    let mut ids = vec![harness.reply().await.id, harness.reply().await.id];
    ids.sort();
    assert_eq!(ids, ["1", "2"]);
    harness.finish();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_evaluator_can_use_render_thread() {
    let mut harness = Harness::start(scripted(
        |request: &EvalRequest, scheduler: &RenderScheduler, _: &CancelToken| {
            let on_render = scheduler
                .invoke(|_| std::thread::current().name().map(str::to_string))
                .map_err(|e| EvaluationError::Failed(e.to_string()))?;
            Ok(EvalResult::rendered(request, json!(on_render)))
        },
    ));
    harness.request("1", "Demo.MainPage", "class MainPage1 {}");

    let result = harness.reply().await;
    assert_eq!(result.outcome, EvalOutcome::Rendered(json!("render")));
    harness.finish();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_cancels_in_flight() {
    let (started_tx, started_rx) = unbounded::<()>();
    let harness = Harness::start(scripted(
        move |request: &EvalRequest, _: &RenderScheduler, token: &CancelToken| {
            let _ = started_tx.send(());
            let deadline = Instant::now() + TIMEOUT;
            while !token.is_cancelled() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(EvalResult::rendered(request, Value::Null))
        },
    ));
    harness.request("1", "Demo.MainPage", "class MainPage1 {}");
    started_rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(harness.handle.in_flight(), 1);

    let handle = harness.handle.clone();
    let rest = harness.finish();

    assert!(rest.is_empty());
    assert!(handle.in_flight.iter().all(|e| e.token.is_cancelled()));
}

// ============================================================================
// Over the wire
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_request_reply_over_channel() {
    let listener = HostListener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).unwrap();
    let port = listener.port();
    let (host_tx, host_rx) = unbounded();
    let host = std::thread::spawn(move || {
        listener
            .accept(move |m| {
                let _ = host_tx.send(m);
            })
            .unwrap()
    });

    let (events_tx, _events) = unbounded();
    let (scheduler, _render) =
        RenderScheduler::start(move || Recorder { events: events_tx }).unwrap();
    let (dispatcher, handle) = EvalDispatcher::new(Arc::new(echo()), scheduler.clone());

    let inbound = handle.clone();
    let device = DeviceChannel::new(move |m| inbound.deliver(m));
    device.connect("127.0.0.1", port).unwrap();
    let host = host.join().unwrap();

    let outbound = device.clone();
    tokio::spawn(dispatcher.run(move |m| {
        let _ = outbound.send(&m);
    }));

    host.send(&WireMessage::from(&EvalRequest::new(
        "7",
        "Demo.MainPage",
        "class MainPage3 {}",
    )))
    .unwrap();

    let reply = tokio::task::spawn_blocking(move || host_rx.recv_timeout(TIMEOUT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.kind, MessageKind::EvalResult);
    assert_eq!(reply.id, "7");
    assert!(reply.has_result);
    assert_eq!(reply.result, Some(json!("class MainPage3 {}")));

    handle.shutdown();
    scheduler.stop();
    device.close();
}

// ============================================================================
// Command evaluator
// ============================================================================

#[cfg(unix)]
mod command {
    use super::*;

    fn evaluate(command: &[&str], token: &CancelToken) -> Result<EvalResult, EvaluationError> {
        let (events_tx, _events) = unbounded();
        let (scheduler, _render) =
            RenderScheduler::start(move || Recorder { events: events_tx }).unwrap();
        let evaluator = CommandEvaluator::new(command.iter().map(|s| s.to_string()).collect());
        let request = EvalRequest::new("1", "Demo.MainPage", r#"{"width": 320}"#);
        let result = evaluator.evaluate(&request, &scheduler, token);
        scheduler.stop();
        result
    }

    #[test]
    fn test_json_stdout_is_rendered() {
        let result = evaluate(&["sh", "-c", "cat"], &CancelToken::new()).unwrap();
        assert_eq!(result.outcome, EvalOutcome::Rendered(json!({"width": 320})));
    }

    #[test]
    fn test_text_stdout_is_rendered() {
        let result = evaluate(&["sh", "-c", "echo \"$HOTVIEW_FULL_NAME\""], &CancelToken::new())
            .unwrap();
        assert_eq!(result.outcome, EvalOutcome::Rendered(json!("Demo.MainPage")));
    }

    #[test]
    fn test_empty_stdout_is_no_result() {
        let result = evaluate(&["sh", "-c", "cat > /dev/null"], &CancelToken::new()).unwrap();
        assert!(!result.has_result());
    }

    #[test]
    fn test_failing_command() {
        let result = evaluate(&["sh", "-c", "echo CS0103 >&2; exit 3"], &CancelToken::new());
        assert!(matches!(result, Err(EvaluationError::Failed(_))));
    }

    #[test]
    fn test_cancelled_command() {
        let token = CancelToken::new();
        token.cancel();
        let result = evaluate(&["sleep", "5"], &token);
        assert!(matches!(result, Err(EvaluationError::Cancelled)));
    }

    #[test]
    fn test_unconfigured() {
        let result = evaluate(&[], &CancelToken::new());
        assert!(matches!(result, Err(EvaluationError::NotConfigured)));
    }
}
