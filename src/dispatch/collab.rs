//! Device-side collaborators: the evaluator and the preview surface.
//!
//! Both are traits so the dispatcher can be driven by the real host
//! environment or by a test double. Default implementations:
//! - [`CommandEvaluator`]: pipes the emitted unit to a configured command
//! - [`TerminalPreview`]: reports through the status display

use serde_json::Value;
use thiserror::Error;

use super::{CancelToken, RenderScheduler};
use crate::channel::{EvalRequest, EvalResult};
use crate::utils::exec::Cmd;

// ============================================================================
// Errors
// ============================================================================

/// The evaluator could not produce a result.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("no evaluator command configured")]
    NotConfigured,

    #[error("cancelled by a newer request")]
    Cancelled,

    #[error("{0}")]
    Failed(String),

    #[error("evaluator panicked: {0}")]
    Panicked(String),
}

/// Presenting a result on the preview surface failed.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("{0}")]
    Rejected(String),

    #[error("preview panicked: {0}")]
    Panicked(String),

    #[error("render thread has stopped")]
    Stopped,
}

// ============================================================================
// Error notices
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Evaluation succeeded but produced nothing renderable.
    NothingToShow,
    EvaluationFailed,
    PreviewFailed,
}

/// What the preview surface shows instead of a rendered result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub full_name: String,
    pub kind: NoticeKind,
    pub message: String,
}

impl ErrorNotice {
    pub fn nothing_to_show(full_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(full_name, NoticeKind::NothingToShow, description)
    }

    pub fn evaluation_failed(full_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(full_name, NoticeKind::EvaluationFailed, error)
    }

    pub fn preview_failed(full_name: impl Into<String>, error: &PreviewError) -> Self {
        Self::new(full_name, NoticeKind::PreviewFailed, error.to_string())
    }

    fn new(full_name: impl Into<String>, kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            kind,
            message: message.into(),
        }
    }

    /// One-line headline for status output.
    pub fn summary(&self) -> String {
        match self.kind {
            NoticeKind::NothingToShow => format!("nothing to show: {}", self.full_name),
            NoticeKind::EvaluationFailed => format!("evaluation failed: {}", self.full_name),
            NoticeKind::PreviewFailed => format!("preview failed: {}", self.full_name),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Runs an emitted unit.
///
/// Called on a worker thread. Work that must touch the preview surface goes
/// through `scheduler`; long evaluations should poll `token`.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        request: &EvalRequest,
        scheduler: &RenderScheduler,
        token: &CancelToken,
    ) -> Result<EvalResult, EvaluationError>;
}

/// The single live preview. Only ever touched on the render thread.
pub trait PreviewSurface {
    fn preview(&mut self, result: &EvalResult) -> Result<(), PreviewError>;

    fn notify_error(&mut self, notice: &ErrorNotice);
}

// ============================================================================
// Command evaluator
// ============================================================================

/// Evaluates by piping the emitted unit to an external command.
///
/// Stdout parsed as JSON (or kept as text) is the rendered payload; empty
/// stdout means the unit ran without anything to show.
pub struct CommandEvaluator {
    command: Vec<String>,
}

impl CommandEvaluator {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Evaluator for CommandEvaluator {
    fn evaluate(
        &self,
        request: &EvalRequest,
        _scheduler: &RenderScheduler,
        token: &CancelToken,
    ) -> Result<EvalResult, EvaluationError> {
        if self.command.is_empty() {
            return Err(EvaluationError::NotConfigured);
        }

        let output = Cmd::from_slice(&self.command)
            .envs([
                ("HOTVIEW_REQUEST_ID", request.id.as_str()),
                ("HOTVIEW_FULL_NAME", request.full_name.as_str()),
            ])
            .stdin(&request.source)
            .run_until(|| token.is_cancelled())
            .map_err(|e| EvaluationError::Failed(format!("{e:#}")))?
            .ok_or(EvaluationError::Cancelled)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(EvalResult::no_result(request, "evaluated without a result"));
        }

        let payload = serde_json::from_str::<Value>(stdout)
            .unwrap_or_else(|_| Value::String(stdout.to_string()));
        Ok(EvalResult::rendered(request, payload))
    }
}

// ============================================================================
// Terminal preview
// ============================================================================

/// Preview surface printing through the status display.
#[derive(Debug, Default)]
pub struct TerminalPreview;

impl PreviewSurface for TerminalPreview {
    fn preview(&mut self, result: &EvalResult) -> Result<(), PreviewError> {
        let crate::channel::EvalOutcome::Rendered(payload) = &result.outcome else {
            return Err(PreviewError::Rejected(format!(
                "no renderable payload for {}",
                result.full_name
            )));
        };
        crate::logger::status_success(&format!(
            "preview: {} {}",
            result.full_name,
            describe(payload)
        ));
        Ok(())
    }

    fn notify_error(&mut self, notice: &ErrorNotice) {
        match notice.kind {
            NoticeKind::NothingToShow => crate::logger::status_info(&notice.summary(), &notice.message),
            _ => crate::logger::status_error(&notice.summary(), &notice.message),
        }
    }
}

/// Short single-line rendering of a payload.
fn describe(payload: &Value) -> String {
    const MAX: usize = 80;
    let text = match payload {
        Value::String(s) => s.lines().next().unwrap_or_default().to_string(),
        other => other.to_string(),
    };
    if text.chars().count() > MAX {
        let cut: String = text.chars().take(MAX).collect();
        format!("({cut}...)")
    } else {
        format!("({text})")
    }
}
