//! Per-call execution context.

use serde::{Deserialize, Serialize};

/// Context carried through every queue operation for log correlation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    trace_id: Option<String>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context carrying a trace id
    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: Some(trace_id.into()),
        }
    }

    /// Get the trace id, if any
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }
}
