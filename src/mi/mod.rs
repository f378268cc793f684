//! GDB Machine Interface (MI) protocol layer
//!
//! Pure text handling: the recursive value grammar, single-line record
//! parsing, and reassembly of complete reply batches from raw process
//! output. Nothing here touches a process or a session.

pub mod framer;
pub mod record;
pub mod value;

pub use framer::{Batch, StreamFramer, PROMPT};
pub use record::{parse_record, MiRecord};
pub use value::{Entry, MiError, MiValue};
