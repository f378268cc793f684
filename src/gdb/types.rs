//! Session-layer types: configuration, events, typed results and errors.

use serde::{Deserialize, Serialize};

use crate::mi::MiError;

/// Session errors surfaced by the command API.
#[derive(Debug, thiserror::Error)]
pub enum GdbError {
    /// The reply's class was `error`; carries the debugger's `msg` text.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// The debugger process ended while a reply was outstanding.
    #[error("debugger transport terminated")]
    TransportTerminated,

    /// No debug session has been started.
    #[error("no debug session is active")]
    NotRunning,

    /// The reply parsed but did not carry the expected fields.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error(transparent)]
    Malformed(#[from] MiError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Notifications emitted to the session's observer, in batch order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Concatenated console-stream text of one reply batch, possibly empty.
    ConsoleText(String),
    /// The debuggee transitioned between running and stopped.
    ///
    /// `reason` is empty when entering the running state, since MI supplies
    /// no reason there.
    StateChanged { running: bool, reason: String },
    /// Source position reported alongside a stop.
    Position { file: String, line: u32 },
    /// A result record carried class `error`.
    CommandError { message: String },
    /// Raw gdbserver stdout, passed through unparsed.
    TargetStdout(String),
    /// Raw gdbserver stderr, passed through unparsed.
    TargetStderr(String),
    /// The debugger process ended; the session is over.
    Exited,
}

/// Last observed execution state, published over a watch channel so
/// callers can await the next transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunState {
    /// No exec-async record seen yet.
    Unknown,
    Running,
    Stopped { reason: String },
    /// The debugger process ended; no further transitions will come.
    Ended,
}

/// A breakpoint reported by `-break-insert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    /// Debugger-assigned breakpoint number.
    pub number: i32,
    /// Resolved source line, when the reply carried one.
    pub line: Option<u32>,
}

/// Debugger invocation settings.
#[derive(Debug, Clone)]
pub struct GdbConfig {
    pub gdb_path: String,
    pub gdbserver_path: String,
    /// TCP port gdbserver listens on and gdb connects to.
    pub port: u16,
}

impl Default for GdbConfig {
    fn default() -> Self {
        Self {
            gdb_path: "gdb".to_string(),
            gdbserver_path: "gdbserver".to_string(),
            port: 9513,
        }
    }
}
