//! Wire types exchanged with the code-visualization backend.
//!
//! The backend answers a [`DebugRequest`] with an SSE-like stream whose
//! frames carry `{"stage": ..., "payload": ...}` objects. Each stage is
//! decoded into one arm of [`DebugEvent`].

mod call;
mod event;

pub use call::CallEvent;
pub use call::CallNode;
pub use event::DebugEvent;
pub use event::DpStepPayload;
pub use event::DpTableSnapshot;
pub use event::RecursionErrorPayload;
pub use event::RecursionPayload;
pub use event::Stage;

use serde::Deserialize;
use serde::Serialize;

/// Body posted to the backend to start a debug run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugRequest {
    /// Source text taken from the editor.
    pub code: String,
    /// Program input (stdin) for the run.
    #[serde(default)]
    pub input: String,
}

impl DebugRequest {
    pub fn new(code: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            input: input.into(),
        }
    }
}
