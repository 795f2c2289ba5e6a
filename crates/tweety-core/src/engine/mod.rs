//! Engine-agnostic types for streaming completions.
//!
//! The session controller consumes any backend through the
//! [`InferenceEngine`] trait; the only built-in implementation is the
//! [`simulated`] engine standing in for a real local-inference runtime.

pub mod simulated;

use std::fmt;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::message::Role;
use crate::models::ModelInfo;

pub use simulated::SimulatedEngine;

/// A single `{role, content}` pair sent to the engine as history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Events emitted during a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental fragment of generated text.
    Delta { text: String },
    /// Natural end of the completion.
    Done,
}

/// Categories of engine errors for consistent handling.
///
/// Cancellation is deliberately not an error kind: a stopped generation is
/// a normal termination path and never surfaces through [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorKind {
    /// A completion was requested before any model finished loading.
    NotLoaded,
    /// The model failed to load.
    ModelLoad,
    /// The completion itself failed mid-flight.
    Completion,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineErrorKind::NotLoaded => write!(f, "not_loaded"),
            EngineErrorKind::ModelLoad => write!(f, "model_load"),
            EngineErrorKind::Completion => write!(f, "completion"),
        }
    }
}

/// Structured error from the engine with kind and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineError {
    /// Error category
    pub kind: EngineErrorKind,
    /// One-line summary suitable for display
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_loaded() -> Self {
        Self::new(EngineErrorKind::NotLoaded, "No model is loaded")
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EngineError {}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Boxed lazy sequence of completion events.
///
/// Finite: terminated by [`StreamEvent::Done`], an `Err` item, or by the
/// cancellation token the stream was created with.
pub type CompletionStream = BoxStream<'static, EngineResult<StreamEvent>>;

/// A local completion backend.
///
/// `complete` must bind the given token: once it is cancelled the stream
/// yields no further items. Consumers additionally poll the token before
/// applying each delta, so buffered in-flight chunks are dropped too.
pub trait InferenceEngine {
    /// Whether a model is loaded and completions can be requested.
    fn is_ready(&self) -> bool;

    /// Loads a model, reporting progress in the 0.0–1.0 range.
    fn load(
        &mut self,
        model: &ModelInfo,
        on_progress: &mut (dyn FnMut(f64) + Send),
    ) -> impl Future<Output = EngineResult<()>> + Send;

    /// Requests a streamed completion for the given history.
    fn complete(
        &self,
        history: &[ChatMessage],
        cancel: CancellationToken,
    ) -> impl Future<Output = EngineResult<CompletionStream>> + Send;
}
