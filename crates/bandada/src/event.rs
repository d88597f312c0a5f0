//! Session event types.
//!
//! A client session communicates with the harness over exactly two channels:
//! its console text stream and its internal-fault stream. Both are delivered
//! through [`SessionEvent`].

use serde::{Deserialize, Serialize};

/// An event emitted by a client session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A console message emitted by the page under test
    Console(String),
    /// An internal fault reported by the session itself
    Fault(InternalFault),
}

/// An internal fault reported by a client session, with an optional stack trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalFault {
    /// Fault message
    pub message: String,
    /// Stack frames, outermost last
    pub trace: Vec<StackFrame>,
}

/// One frame of an in-page stack trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Source file or script URL
    pub file: String,
    /// Line number within the file
    pub line: u64,
    /// Enclosing function name, when the engine reports one
    pub function: Option<String>,
}

impl StackFrame {
    /// Create a frame without a function name
    #[must_use]
    pub fn new(file: impl Into<String>, line: u64) -> Self {
        Self {
            file: file.into(),
            line,
            function: None,
        }
    }

    /// Attach the enclosing function name
    #[must_use]
    pub fn in_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }
}

impl InternalFault {
    /// Create a fault with no trace
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Append a stack frame
    #[must_use]
    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        self.trace.push(frame);
        self
    }

    /// Format the fault as a multi-line message, one ` -> ` line per frame.
    ///
    /// ```text
    /// ERROR: node is not defined
    /// TRACE:
    ///  -> http://localhost:8080/pairs/game.js: 120 (in function "onStep")
    ///  -> http://localhost:8080/pairs/game.js: 88
    /// ```
    #[must_use]
    pub fn format(&self) -> String {
        let mut lines = vec![format!("ERROR: {}", self.message)];
        if !self.trace.is_empty() {
            lines.push("TRACE:".to_string());
            for frame in &self.trace {
                match &frame.function {
                    Some(function) => lines.push(format!(
                        " -> {}: {} (in function \"{function}\")",
                        frame.file, frame.line
                    )),
                    None => lines.push(format!(" -> {}: {}", frame.file, frame.line)),
                }
            }
        }
        lines.join("\n")
    }
}
