//! Command API: typed debugger operations over the MI wire.
//!
//! Synchronous operations register a one-shot continuation with the
//! dispatcher, send their command, and suspend until that continuation
//! resolves with the reply batch. Correlation is positional (MI carries no
//! tokens for this subset), so only one synchronous command may be in
//! flight; overlapping one corrupts the single continuation slot.
//! Asynchronous operations send their command and return immediately,
//! leaving the state machine and observer to surface the effects.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::gdb::dispatcher::Dispatcher;
use crate::gdb::process::{GdbTransport, TargetInput};
use crate::gdb::types::{Breakpoint, GdbConfig, GdbError, RunState, SessionEvent};
use crate::mi::record::parse_record;
use crate::mi::{Batch, MiRecord, MiValue};

/// One debug session: a gdb + gdbserver pair driven over MI.
pub struct GdbSession {
    config: GdbConfig,
    dispatcher: Arc<Mutex<Dispatcher>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    transport: Option<GdbTransport>,
}

impl GdbSession {
    pub fn new(config: GdbConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            dispatcher: Arc::new(Mutex::new(Dispatcher::new(event_tx.clone()))),
            event_tx,
            event_rx: Some(event_rx),
            transport: None,
        }
    }

    /// Take the event receiver; available once.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.event_rx.take()
    }

    /// Whether the debuggee is currently running.
    pub fn is_running(&self) -> bool {
        self.dispatcher.lock().unwrap().is_running()
    }

    /// Begin a session: spawn the processes, discard the banner batch gdb
    /// prints before any command, then select the remote target and load
    /// symbols.
    pub async fn start(&mut self, program: &str, args: &[String]) -> Result<(), GdbError> {
        let banner = self.dispatcher.lock().unwrap().expect_reply();
        let spawned = GdbTransport::spawn(
            &self.config,
            program,
            args,
            Arc::clone(&self.dispatcher),
            self.event_tx.clone(),
        )
        .await;
        let transport = match spawned {
            Ok(transport) => transport,
            Err(e) => {
                // Nothing will ever answer; free the slot.
                self.dispatcher.lock().unwrap().abandon_reply();
                return Err(e);
            }
        };
        self.transport = Some(transport);

        banner.await.map_err(|_| GdbError::TransportTerminated)?;
        self.dispatcher.lock().unwrap().reset();

        self.send_line(&format!("-target-select remote :{}", self.config.port))?;
        self.send_line(&format!(
            "-file-exec-and-symbols \"{}\"",
            escape_path(program)
        ))?;
        Ok(())
    }

    /// Suspend until the next transition into the stopped state and
    /// return the stop reason.
    ///
    /// Waits for a transition, so a debuggee that is already stopped does
    /// not resolve until it runs and stops again. Resolves with
    /// [`GdbError::TransportTerminated`] if the debugger ends first.
    pub async fn wait_until_stopped(&self) -> Result<String, GdbError> {
        if self.transport.is_none() {
            return Err(GdbError::NotRunning);
        }
        let mut state = self.dispatcher.lock().unwrap().run_state();
        if *state.borrow_and_update() == RunState::Ended {
            return Err(GdbError::TransportTerminated);
        }
        loop {
            state
                .changed()
                .await
                .map_err(|_| GdbError::TransportTerminated)?;
            let current = state.borrow_and_update().clone();
            match current {
                RunState::Stopped { reason } => return Ok(reason),
                RunState::Ended => return Err(GdbError::TransportTerminated),
                RunState::Running | RunState::Unknown => {}
            }
        }
    }

    // --- synchronous operations ---

    /// Insert a breakpoint at a location (line number, function name, or
    /// `file:line`). Returns the debugger-assigned number and, when the
    /// reply carries one, the resolved source line.
    pub async fn insert_breakpoint(&mut self, location: &str) -> Result<Breakpoint, GdbError> {
        let batch = self.execute(&format!("-break-insert -f {location}")).await?;
        let rec = first_result(&batch)?;
        let bkpt = rec
            .fields
            .locate("bkpt")
            .ok_or_else(|| GdbError::UnexpectedReply("no bkpt in reply".into()))?;
        let number = bkpt
            .locate("number")
            .map(MiValue::text)
            .unwrap_or("")
            .parse()
            .map_err(|_| GdbError::UnexpectedReply("bkpt carries no number".into()))?;
        let line = bkpt
            .locate("line")
            .and_then(MiValue::as_text)
            .and_then(|s| s.parse().ok());
        debug!(number, ?line, "breakpoint inserted");
        Ok(Breakpoint { number, line })
    }

    /// Delete one breakpoint.
    pub async fn delete_breakpoint(&mut self, number: i32) -> Result<(), GdbError> {
        let batch = self.execute(&format!("-break-delete {number}")).await?;
        first_result(&batch)?;
        Ok(())
    }

    /// Evaluate an expression in the current frame; returns the decoded
    /// `value` text.
    pub async fn evaluate(&mut self, expr: &str) -> Result<String, GdbError> {
        let batch = self
            .execute(&format!("-data-evaluate-expression {expr}"))
            .await?;
        let rec = first_result(&batch)?;
        rec.fields
            .locate("value")
            .and_then(MiValue::as_text)
            .map(str::to_string)
            .ok_or_else(|| GdbError::UnexpectedReply("no value in reply".into()))
    }

    /// Ask the debugger to quit and wait for the acknowledgment, which may
    /// arrive in the terminal sentinel-less batch. Kills both processes
    /// afterwards; the observer sees `Exited` when the transport ends.
    pub async fn exit(&mut self) -> Result<(), GdbError> {
        let batch = self.execute("-gdb-exit").await?;
        if let Some(payload) = batch.with_marker('^').next() {
            match parse_record(payload) {
                Ok(rec) if rec.class != "exit" => {
                    warn!(class = %rec.class, "unexpected -gdb-exit acknowledgment")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "malformed -gdb-exit acknowledgment"),
            }
        }
        if let Some(transport) = self.transport.take() {
            transport.shutdown().await;
        }
        Ok(())
    }

    // --- asynchronous operations ---

    /// Continue execution; effects surface through the state machine.
    pub fn resume(&self) -> Result<(), GdbError> {
        self.send_line("-exec-continue")
    }

    /// Step over one source line.
    pub fn step_over(&self) -> Result<(), GdbError> {
        self.send_line("-exec-next")
    }

    /// Step into calls on the current line.
    pub fn step_into(&self) -> Result<(), GdbError> {
        self.send_line("-exec-step")
    }

    /// Run until the current function returns.
    pub fn step_out(&self) -> Result<(), GdbError> {
        self.send_line("-exec-finish")
    }

    pub fn enable_breakpoint(&self, number: i32) -> Result<(), GdbError> {
        self.send_line(&format!("-break-enable {number}"))
    }

    pub fn disable_breakpoint(&self, number: i32) -> Result<(), GdbError> {
        self.send_line(&format!("-break-disable {number}"))
    }

    pub fn delete_all_breakpoints(&self) -> Result<(), GdbError> {
        self.send_line("-break-delete")
    }

    // --- debuggee stdin ---

    /// Forward text to the debuggee's stdin through gdbserver.
    pub fn write_target_stdin(&self, text: &str) -> Result<(), GdbError> {
        let transport = self.transport.as_ref().ok_or(GdbError::NotRunning)?;
        transport
            .target_stdin
            .send(TargetInput::Data(text.to_string()))
            .map_err(|_| GdbError::TransportTerminated)
    }

    /// Close the debuggee's stdin, signalling end of input.
    pub fn close_target_stdin(&self) -> Result<(), GdbError> {
        let transport = self.transport.as_ref().ok_or(GdbError::NotRunning)?;
        transport
            .target_stdin
            .send(TargetInput::Close)
            .map_err(|_| GdbError::TransportTerminated)
    }

    /// Tear the processes down without the MI goodbye.
    pub async fn terminate(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.shutdown().await;
        }
    }

    // --- plumbing ---

    /// Send a command and suspend until the next reply batch arrives.
    async fn execute(&mut self, command: &str) -> Result<Batch, GdbError> {
        let reply = self.dispatcher.lock().unwrap().expect_reply();
        self.send_line(command)?;
        reply.await.map_err(|_| GdbError::TransportTerminated)
    }

    fn send_line(&self, command: &str) -> Result<(), GdbError> {
        let transport = self.transport.as_ref().ok_or(GdbError::NotRunning)?;
        debug!(command, "sending MI command");
        transport
            .commands
            .send(format!("{command}\n"))
            .map_err(|_| GdbError::TransportTerminated)
    }

    #[cfg(test)]
    fn attach_loopback(&mut self) -> mpsc::UnboundedReceiver<String> {
        let (transport, command_rx, _target_rx) = GdbTransport::loopback();
        self.transport = Some(transport);
        command_rx
    }
}

/// First result record of a reply; an `error` class becomes
/// [`GdbError::CommandFailed`], an empty terminal batch becomes
/// [`GdbError::TransportTerminated`].
fn first_result(batch: &Batch) -> Result<MiRecord, GdbError> {
    let payload = batch
        .with_marker('^')
        .next()
        .ok_or(GdbError::TransportTerminated)?;
    let rec = parse_record(payload)?;
    if rec.class == "error" {
        let msg = rec.fields.locate("msg").map(MiValue::text).unwrap_or("");
        return Err(GdbError::CommandFailed(msg.to_string()));
    }
    Ok(rec)
}

fn escape_path(path: &str) -> String {
    path.replace('\\', "\\\\").replace('"', "\\\"")
}
