//! Debug session layer: dispatching, process transport and the command API.

pub mod dispatcher;
pub(crate) mod process;
pub mod session;
pub mod types;

pub use session::GdbSession;
pub use types::{Breakpoint, GdbConfig, GdbError, RunState, SessionEvent};
