//! Evaluation Message Protocol
//!
//! Defines the JSON envelope exchanged between the development host and a
//! device over the persistent channel.
//!
//! # Message Kinds
//!
//! - `eval-request`: host → device, carries an emitted unit to run
//! - `eval-result`: device → host, exactly one per decoded request
//!
//! ```json
//! {"kind":"eval-request","id":"7","fullName":"Demo.MainPage","source":"...","hasResult":false,"error":null}
//! {"kind":"eval-result","id":"7","fullName":"Demo.MainPage","result":{...},"hasResult":true,"error":null}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Envelope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    EvalRequest,
    EvalResult,
}

/// Wire envelope, exactly as serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub kind: MessageKind,
    /// Correlation id, opaque.
    pub id: String,
    /// Target view identity.
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default)]
    pub has_result: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// A wire message could not be turned into a request or result.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected {expected:?}, got {actual:?}")]
    UnexpectedKind {
        expected: MessageKind,
        actual: MessageKind,
    },

    #[error("`{0}` is missing or empty")]
    MissingField(&'static str),
}

impl WireMessage {
    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON string
    pub fn from_json(s: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(s)?)
    }

    fn expect_kind(&self, expected: MessageKind) -> Result<(), DecodeError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(DecodeError::UnexpectedKind {
                expected,
                actual: self.kind,
            })
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Run an emitted unit on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalRequest {
    pub id: String,
    pub full_name: String,
    pub source: String,
}

impl EvalRequest {
    pub fn new(id: impl Into<String>, full_name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            full_name: full_name.into(),
            source: source.into(),
        }
    }
}

impl From<&EvalRequest> for WireMessage {
    fn from(request: &EvalRequest) -> Self {
        Self {
            kind: MessageKind::EvalRequest,
            id: request.id.clone(),
            full_name: request.full_name.clone(),
            source: Some(request.source.clone()),
            result: None,
            has_result: false,
            error: None,
        }
    }
}

impl TryFrom<WireMessage> for EvalRequest {
    type Error = DecodeError;

    fn try_from(message: WireMessage) -> Result<Self, Self::Error> {
        message.expect_kind(MessageKind::EvalRequest)?;
        if message.id.is_empty() {
            return Err(DecodeError::MissingField("id"));
        }
        let source = message
            .source
            .filter(|s| !s.is_empty())
            .ok_or(DecodeError::MissingField("source"))?;
        Ok(Self {
            id: message.id,
            full_name: message.full_name,
            source,
        })
    }
}

// ============================================================================
// Results
// ============================================================================

/// What an evaluation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    /// A renderable payload for the preview surface.
    Rendered(Value),
    /// Ran fine but there is nothing to show (e.g. a pure statement).
    NoResult { description: String },
    /// Evaluation failed, was cancelled or superseded.
    Failed { error: String },
}

/// Reply to one [`EvalRequest`], routed by `id` and `full_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult {
    pub id: String,
    pub full_name: String,
    pub outcome: EvalOutcome,
}

impl EvalResult {
    pub fn rendered(request: &EvalRequest, payload: Value) -> Self {
        Self::reply(request, EvalOutcome::Rendered(payload))
    }

    pub fn no_result(request: &EvalRequest, description: impl Into<String>) -> Self {
        Self::reply(
            request,
            EvalOutcome::NoResult {
                description: description.into(),
            },
        )
    }

    pub fn failed(request: &EvalRequest, error: impl Into<String>) -> Self {
        Self::reply(
            request,
            EvalOutcome::Failed {
                error: error.into(),
            },
        )
    }

    fn reply(request: &EvalRequest, outcome: EvalOutcome) -> Self {
        Self {
            id: request.id.clone(),
            full_name: request.full_name.clone(),
            outcome,
        }
    }

    pub fn has_result(&self) -> bool {
        matches!(self.outcome, EvalOutcome::Rendered(_))
    }
}

impl From<&EvalResult> for WireMessage {
    fn from(result: &EvalResult) -> Self {
        let (payload, has_result, error) = match &result.outcome {
            EvalOutcome::Rendered(value) => (Some(value.clone()), true, None),
            EvalOutcome::NoResult { description } => {
                (Some(Value::String(description.clone())), false, None)
            }
            EvalOutcome::Failed { error } => (None, false, Some(error.clone())),
        };
        Self {
            kind: MessageKind::EvalResult,
            id: result.id.clone(),
            full_name: result.full_name.clone(),
            source: None,
            result: payload,
            has_result,
            error,
        }
    }
}

impl TryFrom<WireMessage> for EvalResult {
    type Error = DecodeError;

    fn try_from(message: WireMessage) -> Result<Self, Self::Error> {
        message.expect_kind(MessageKind::EvalResult)?;
        let outcome = match (message.error, message.has_result, message.result) {
            (Some(error), _, _) => EvalOutcome::Failed { error },
            (None, true, payload) => EvalOutcome::Rendered(payload.unwrap_or(Value::Null)),
            (None, false, payload) => EvalOutcome::NoResult {
                description: match payload {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                },
            },
        };
        Ok(Self {
            id: message.id,
            full_name: message.full_name,
            outcome,
        })
    }
}
