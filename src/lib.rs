//! GDB/MI protocol engine
//!
//! Drives a gdb + gdbserver pair over the line-oriented Machine Interface
//! protocol: parses the recursive MI value grammar into structured data,
//! reassembles complete reply batches from partial process output, and
//! correlates each batch with the command that caused it while tracking
//! the debuggee's run/stop state.
//!
//! ```no_run
//! use gdbmi::{GdbConfig, GdbSession};
//!
//! # async fn demo() -> Result<(), gdbmi::GdbError> {
//! let mut session = GdbSession::new(GdbConfig::default());
//! session.start("./target/debug/app", &[]).await?;
//!
//! let bp = session.insert_breakpoint("main").await?;
//! session.resume()?;
//! let reason = session.wait_until_stopped().await?;
//! println!("stopped: {reason}");
//! println!("argc = {}", session.evaluate("argc").await?);
//! session.delete_breakpoint(bp.number).await?;
//! session.exit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Replies carry no correlation tokens in this MI subset: the next batch
//! after a command is taken to be its reply. Callers must therefore not
//! overlap synchronous commands; asynchronous ones (`resume`, the step
//! family) are safe to fire freely.

pub mod gdb;
pub mod mi;

pub use gdb::{Breakpoint, GdbConfig, GdbError, GdbSession, RunState, SessionEvent};
pub use mi::{Batch, Entry, MiError, MiRecord, MiValue, StreamFramer};
