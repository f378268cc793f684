//! Reply dispatch and session state machine
//!
//! Every complete reply batch runs through two hands: an always-invoked
//! default observer (console text, run/stop transitions, error records)
//! and, when a synchronous command is outstanding, a one-shot continuation
//! that receives the whole batch. Correlation is positional, with no MI
//! tokens: the next batch after a command is taken to be its reply, so at
//! most one continuation may be outstanding at a time.

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::gdb::types::{RunState, SessionEvent};
use crate::mi::record::parse_record;
use crate::mi::{Batch, MiValue};

/// Owns the run/stop state and the single pending-continuation slot.
///
/// Both are mutated only from within batch processing; no other component
/// writes them.
pub struct Dispatcher {
    /// `None` until the first exec-async record is seen.
    running: Option<bool>,
    pending: Option<oneshot::Sender<Batch>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state_tx: watch::Sender<RunState>,
}

impl Dispatcher {
    pub fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        let (state_tx, _) = watch::channel(RunState::Unknown);
        Self {
            running: None,
            pending: None,
            events,
            state_tx,
        }
    }

    /// Whether the debuggee is currently running; the initial unknown
    /// phase reads as not running.
    pub fn is_running(&self) -> bool {
        self.running.unwrap_or(false)
    }

    /// Watch the execution state; `changed()` wakes on each transition.
    pub fn run_state(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    /// Forget the run/stop state for a fresh session.
    pub fn reset(&mut self) {
        self.running = None;
        self.state_tx.send_replace(RunState::Unknown);
    }

    /// Install the continuation for the next batch.
    ///
    /// Issuing a second synchronous command while one is outstanding
    /// violates the positional-correlation discipline; the stale
    /// continuation is dropped (its caller resumes with a closed-channel
    /// error) and the new one takes the slot.
    pub fn expect_reply(&mut self) -> oneshot::Receiver<Batch> {
        let (tx, rx) = oneshot::channel();
        if self.pending.replace(tx).is_some() {
            warn!("previous reply continuation still pending; replacing it");
        }
        rx
    }

    /// Drop an installed continuation without delivering anything, so a
    /// failed command setup does not leave the slot occupied.
    pub fn abandon_reply(&mut self) {
        self.pending = None;
    }

    #[cfg(test)]
    pub(crate) fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Run the default observer over one batch, then hand it to the
    /// pending continuation if any.
    pub fn process_batch(&mut self, batch: Batch) {
        self.emit_console_text(&batch);
        self.apply_exec_state(&batch);
        self.emit_result_errors(&batch);

        // Take the continuation out of the slot before delivery so it is
        // cleared even if the resumed caller immediately issues a new
        // command.
        if let Some(tx) = self.pending.take() {
            let _ = tx.send(batch);
        }
    }

    /// Resolve any pending continuation with an empty terminal batch and
    /// announce the end of the session. Called once at transport EOF.
    pub fn close(&mut self) {
        if let Some(tx) = self.pending.take() {
            debug!("transport ended with a reply outstanding; resuming caller");
            let _ = tx.send(Batch::default());
        }
        self.state_tx.send_replace(RunState::Ended);
        let _ = self.events.send(SessionEvent::Exited);
    }

    fn emit_console_text(&self, batch: &Batch) {
        let mut text = String::new();
        for payload in batch.with_marker('~') {
            match MiValue::parse(payload) {
                Ok((value, _)) => text.push_str(value.text()),
                Err(e) => warn!(payload, error = %e, "skipping malformed console line"),
            }
        }
        let _ = self.events.send(SessionEvent::ConsoleText(text));
    }

    fn apply_exec_state(&mut self, batch: &Batch) {
        // Later exec-async lines override earlier ones within a batch.
        let Some(payload) = batch.with_marker('*').last() else {
            return;
        };
        let rec = match parse_record(payload) {
            Ok(rec) => rec,
            Err(e) => {
                warn!(payload, error = %e, "skipping malformed exec-async line");
                return;
            }
        };
        let now_running = rec.class == "running";
        if self.running == Some(now_running) {
            return;
        }
        self.running = Some(now_running);
        // No `reason` field exists while running; text() degrades to "".
        let reason = rec
            .fields
            .locate("reason")
            .map(MiValue::text)
            .unwrap_or("")
            .to_string();
        debug!(running = now_running, reason, "execution state changed");
        let _ = self.events.send(SessionEvent::StateChanged {
            running: now_running,
            reason: reason.clone(),
        });
        self.state_tx.send_replace(if now_running {
            RunState::Running
        } else {
            RunState::Stopped { reason }
        });
        if !now_running {
            self.emit_position(&rec.fields);
        }
    }

    fn emit_position(&self, fields: &MiValue) {
        let Some(frame) = fields.locate("frame") else {
            return;
        };
        let file = frame.locate("fullname").map(MiValue::text).unwrap_or("");
        if file.is_empty() {
            return;
        }
        let Ok(line) = frame
            .locate("line")
            .map(MiValue::text)
            .unwrap_or("")
            .parse::<u32>()
        else {
            return;
        };
        let _ = self.events.send(SessionEvent::Position {
            file: file.to_string(),
            line,
        });
    }

    fn emit_result_errors(&self, batch: &Batch) {
        for payload in batch.with_marker('^') {
            match parse_record(payload) {
                Ok(rec) if rec.class == "error" => {
                    let message = rec
                        .fields
                        .locate("msg")
                        .map(MiValue::text)
                        .unwrap_or("")
                        .to_string();
                    let _ = self.events.send(SessionEvent::CommandError { message });
                }
                Ok(_) => {}
                Err(e) => warn!(payload, error = %e, "skipping malformed result line"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> (Dispatcher, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Dispatcher::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    const STOPPED_AT_BREAKPOINT: &str =
        r#"*stopped,reason="breakpoint-hit",frame={fullname="/a/b.c",line="5"}"#;

    #[test]
    fn test_console_text_concatenates() {
        let (mut d, mut rx) = dispatcher();
        d.process_batch(Batch::from_lines([r#"~"a""#, r#"~"b""#]));
        assert_eq!(drain(&mut rx), [SessionEvent::ConsoleText("ab".into())]);
    }

    #[test]
    fn test_console_text_emitted_even_when_empty() {
        let (mut d, mut rx) = dispatcher();
        d.process_batch(Batch::from_lines(["^done"]));
        assert_eq!(drain(&mut rx), [SessionEvent::ConsoleText(String::new())]);
    }

    #[test]
    fn test_stop_transition_emits_state_and_position_once() {
        let (mut d, mut rx) = dispatcher();
        d.process_batch(Batch::from_lines(["*running"]));
        assert!(d.is_running());
        drain(&mut rx);

        d.process_batch(Batch::from_lines([STOPPED_AT_BREAKPOINT]));
        assert!(!d.is_running());
        let events = drain(&mut rx);
        assert_eq!(
            events,
            [
                SessionEvent::ConsoleText(String::new()),
                SessionEvent::StateChanged {
                    running: false,
                    reason: "breakpoint-hit".into()
                },
                SessionEvent::Position {
                    file: "/a/b.c".into(),
                    line: 5
                },
            ]
        );

        // Replaying the same batch must not emit another transition.
        d.process_batch(Batch::from_lines([STOPPED_AT_BREAKPOINT]));
        assert_eq!(drain(&mut rx), [SessionEvent::ConsoleText(String::new())]);
    }

    #[test]
    fn test_running_transition_has_empty_reason() {
        let (mut d, mut rx) = dispatcher();
        d.process_batch(Batch::from_lines([r#"*running,thread-id="all""#]));
        let events = drain(&mut rx);
        assert!(events.contains(&SessionEvent::StateChanged {
            running: true,
            reason: String::new()
        }));
    }

    #[test]
    fn test_last_exec_async_line_wins() {
        let (mut d, mut rx) = dispatcher();
        d.process_batch(Batch::from_lines([
            "*running",
            r#"*stopped,reason="end-stepping-range""#,
        ]));
        assert!(!d.is_running());
        let events = drain(&mut rx);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SessionEvent::StateChanged { .. }))
                .count(),
            1
        );
        assert!(events.contains(&SessionEvent::StateChanged {
            running: false,
            reason: "end-stepping-range".into()
        }));
    }

    #[test]
    fn test_stop_without_fullname_has_no_position() {
        let (mut d, mut rx) = dispatcher();
        d.process_batch(Batch::from_lines([
            r#"*stopped,reason="exited-normally""#,
        ]));
        let events = drain(&mut rx);
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::Position { .. })));
    }

    #[test]
    fn test_error_result_record_emits_event() {
        let (mut d, mut rx) = dispatcher();
        d.process_batch(Batch::from_lines([r#"^error,msg="No symbol""#]));
        let events = drain(&mut rx);
        assert!(events.contains(&SessionEvent::CommandError {
            message: "No symbol".into()
        }));
    }

    #[test]
    fn test_continuation_receives_batch_and_slot_clears() {
        let (mut d, mut rx) = dispatcher();
        let mut reply = d.expect_reply();
        let batch = Batch::from_lines([r#"^done,value="42""#]);
        d.process_batch(batch.clone());
        assert_eq!(reply.try_recv().unwrap(), batch);
        drain(&mut rx);

        // The slot is one-shot: the next batch goes to the observer only.
        let mut second = d.expect_reply();
        d.process_batch(Batch::from_lines(["^done"]));
        assert!(second.try_recv().is_ok());
        d.process_batch(Batch::from_lines(["^done"]));
        assert!(matches!(
            second.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_close_resolves_pending_with_terminal_batch() {
        let (mut d, mut rx) = dispatcher();
        let mut reply = d.expect_reply();
        d.close();
        assert_eq!(reply.try_recv().unwrap(), Batch::default());
        assert_eq!(drain(&mut rx), [SessionEvent::Exited]);
    }

    #[test]
    fn test_run_state_watch_tracks_transitions() {
        let (mut d, _rx) = dispatcher();
        let state = d.run_state();
        assert_eq!(*state.borrow(), RunState::Unknown);
        d.process_batch(Batch::from_lines(["*running"]));
        assert_eq!(*state.borrow(), RunState::Running);
        d.process_batch(Batch::from_lines([STOPPED_AT_BREAKPOINT]));
        assert_eq!(
            *state.borrow(),
            RunState::Stopped {
                reason: "breakpoint-hit".into()
            }
        );
        d.reset();
        assert_eq!(*state.borrow(), RunState::Unknown);
        d.close();
        assert_eq!(*state.borrow(), RunState::Ended);
    }

    #[test]
    fn test_abandoned_reply_frees_the_slot() {
        let (mut d, _rx) = dispatcher();
        let mut reply = d.expect_reply();
        assert!(d.has_pending());
        d.abandon_reply();
        assert!(!d.has_pending());
        assert!(matches!(
            reply.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_replacing_a_pending_continuation_drops_the_old_one() {
        let (mut d, _rx) = dispatcher();
        let mut first = d.expect_reply();
        let mut second = d.expect_reply();
        assert!(matches!(
            first.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        d.process_batch(Batch::from_lines(["^done"]));
        assert!(second.try_recv().is_ok());
    }
}
