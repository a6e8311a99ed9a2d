//! Eval Dispatcher - Device-Side Request Handling
//!
//! Turns inbound `eval-request`s into evaluations and their results into
//! previews, error notices and exactly one `eval-result` reply per request.
//!
//! # Architecture
//!
//! ```text
//! channel reader ──deliver()──► EvalDispatcher (tokio actor)
//!                                  │ decode, drop undecodable
//!                                  │ cancel superseded (same fullName)
//!                                  ▼
//!                            spawn_blocking(evaluate) ──Finished──┐
//!                                  ▲                              │
//!                                  └──────────────────────────────┘
//!                                  │
//!                 ┌────────────────┼─────────────────┐
//!                 ▼                ▼                 ▼
//!           hand_off()        notify()          reply(eval-result)
//!           (render thread)   (render thread)   (channel)
//! ```
//!
//! Per request: `Received → Evaluating → {Succeeded, Failed}`. The receive
//! path never waits on an evaluation; only presentation is serialized.

mod cancel;
mod collab;
mod render;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

pub use cancel::CancelToken;
pub use collab::{
    CommandEvaluator, ErrorNotice, EvaluationError, Evaluator, NoticeKind, PreviewError,
    PreviewSurface, TerminalPreview,
};
pub use render::RenderScheduler;

use crate::channel::{EvalOutcome, EvalRequest, EvalResult, WireMessage};

/// Messages to the dispatcher actor
#[derive(Debug)]
pub enum DispatchMsg {
    /// Raw message read from the channel
    Received(WireMessage),
    /// An evaluation returned (or panicked)
    Finished {
        seq: u64,
        request: EvalRequest,
        token: CancelToken,
        outcome: Result<EvalResult, EvaluationError>,
    },
    /// Stop after the current message
    Shutdown,
}

/// Evaluation currently running for one view.
struct InFlight {
    seq: u64,
    token: CancelToken,
}

type InFlightMap = Arc<DashMap<String, InFlight>>;

/// Sending side of the dispatcher, handed to the channel callback.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<DispatchMsg>,
    in_flight: InFlightMap,
}

impl DispatchHandle {
    /// Queue an inbound message; never blocks.
    pub fn deliver(&self, message: WireMessage) {
        if self.tx.send(DispatchMsg::Received(message)).is_err() {
            crate::debug!("dispatch"; "dispatcher stopped, dropping message");
        }
    }

    /// Cancel running evaluations and stop the actor.
    pub fn shutdown(&self) {
        for entry in self.in_flight.iter() {
            entry.token.cancel();
        }
        let _ = self.tx.send(DispatchMsg::Shutdown);
    }

    /// Number of evaluations still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Dispatcher actor
pub struct EvalDispatcher {
    rx: mpsc::UnboundedReceiver<DispatchMsg>,
    /// Weak so the loop ends once every handle and task is gone
    tx: mpsc::WeakUnboundedSender<DispatchMsg>,
    evaluator: Arc<dyn Evaluator>,
    scheduler: RenderScheduler,
    in_flight: InFlightMap,
    next_seq: u64,
}

impl EvalDispatcher {
    pub fn new(evaluator: Arc<dyn Evaluator>, scheduler: RenderScheduler) -> (Self, DispatchHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let in_flight: InFlightMap = Arc::new(DashMap::new());

        let dispatcher = Self {
            rx,
            tx: tx.downgrade(),
            evaluator,
            scheduler,
            in_flight: Arc::clone(&in_flight),
            next_seq: 0,
        };
        (dispatcher, DispatchHandle { tx, in_flight })
    }

    /// Run the actor event loop; `reply` sends one result back to the peer.
    pub async fn run(mut self, reply: impl Fn(WireMessage) + Send + Sync + 'static) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                DispatchMsg::Received(message) => self.on_received(message, &reply),
                DispatchMsg::Finished {
                    seq,
                    request,
                    token,
                    outcome,
                } => {
                    let result = self.on_finished(seq, &request, &token, outcome);
                    reply(WireMessage::from(&result));
                }
                DispatchMsg::Shutdown => break,
            }
        }

        for entry in self.in_flight.iter() {
            entry.token.cancel();
        }
        crate::debug!("dispatch"; "stopped");
    }

    fn on_received(&mut self, message: WireMessage, reply: &impl Fn(WireMessage)) {
        let request = match EvalRequest::try_from(message) {
            Ok(request) => request,
            Err(e) => {
                crate::log!("dispatch"; "dropping message: {}", e);
                return;
            }
        };

        self.next_seq += 1;
        let seq = self.next_seq;
        let token = CancelToken::new();

        crate::debug!("dispatch"; "evaluating {} ({})", request.full_name, request.id);
        if let Some(previous) = self.in_flight.insert(
            request.full_name.clone(),
            InFlight {
                seq,
                token: token.clone(),
            },
        ) {
            crate::debug!("dispatch"; "superseding evaluation #{} of {}", previous.seq, request.full_name);
            previous.token.cancel();
        }

        let Some(tx) = self.tx.upgrade() else {
            self.in_flight.remove(&request.full_name);
            reply(WireMessage::from(&EvalResult::failed(
                &request,
                "dispatcher is shutting down",
            )));
            return;
        };

        let evaluator = Arc::clone(&self.evaluator);
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            let task_request = request.clone();
            let task_token = token.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                evaluator.evaluate(&task_request, &scheduler, &task_token)
            })
            .await
            .unwrap_or_else(|e| Err(join_failure(e)));

            let _ = tx.send(DispatchMsg::Finished {
                seq,
                request,
                token,
                outcome,
            });
        });
    }

    /// Route a finished evaluation and build the reply.
    fn on_finished(
        &mut self,
        seq: u64,
        request: &EvalRequest,
        token: &CancelToken,
        outcome: Result<EvalResult, EvaluationError>,
    ) -> EvalResult {
        self.in_flight
            .remove_if(&request.full_name, |_, current| current.seq == seq);

        if token.is_cancelled() {
            crate::debug!("dispatch"; "discarding superseded result {}", request.id);
            return EvalResult::failed(request, EvaluationError::Cancelled.to_string());
        }

        match outcome {
            Ok(result) => {
                // Correlation always follows the request
                let result = EvalResult {
                    id: request.id.clone(),
                    full_name: request.full_name.clone(),
                    outcome: result.outcome,
                };
                self.present(seq, &result);
                result
            }
            Err(e) => {
                crate::log!("dispatch"; "evaluation of {} failed: {}", request.full_name, e);
                self.scheduler.notify(ErrorNotice::evaluation_failed(
                    &request.full_name,
                    e.to_string(),
                ));
                EvalResult::failed(request, e.to_string())
            }
        }
    }

    fn present(&self, seq: u64, result: &EvalResult) {
        match &result.outcome {
            EvalOutcome::Rendered(_) => self.scheduler.hand_off(seq, result.clone()),
            EvalOutcome::NoResult { description } => self.scheduler.notify(
                ErrorNotice::nothing_to_show(&result.full_name, description.as_str()),
            ),
            EvalOutcome::Failed { error } => self.scheduler.notify(
                ErrorNotice::evaluation_failed(&result.full_name, error.as_str()),
            ),
        }
    }
}

fn join_failure(error: tokio::task::JoinError) -> EvaluationError {
    if error.is_panic() {
        EvaluationError::Panicked(render::panic_message(&*error.into_panic()))
    } else {
        EvaluationError::Failed("evaluation task was aborted".into())
    }
}
