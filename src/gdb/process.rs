//! Process transport: gdb and gdbserver lifecycle plus raw I/O pumps.
//!
//! The session talks to this layer through channels only. gdb's stdout is
//! framed into reply batches and fed to the dispatcher; gdbserver's stdout
//! and stderr pass through to observers unparsed; command lines and
//! debuggee stdin flow the other way.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::gdb::dispatcher::Dispatcher;
use crate::gdb::types::{GdbConfig, GdbError, SessionEvent};
use crate::mi::StreamFramer;

/// Input destined for the debuggee's stdin, forwarded through gdbserver.
#[derive(Debug)]
pub(crate) enum TargetInput {
    Data(String),
    Close,
}

/// Handles to a live gdb + gdbserver pair.
pub(crate) struct GdbTransport {
    pub(crate) commands: mpsc::UnboundedSender<String>,
    pub(crate) target_stdin: mpsc::UnboundedSender<TargetInput>,
    gdb: Option<Child>,
    server: Option<Child>,
}

impl GdbTransport {
    /// Spawn both processes and wire their pipes to the dispatcher and
    /// event channel.
    pub(crate) async fn spawn(
        config: &GdbConfig,
        program: &str,
        args: &[String],
        dispatcher: Arc<Mutex<Dispatcher>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, GdbError> {
        info!(program, port = config.port, "starting gdbserver and gdb");

        let mut server = Command::new(&config.gdbserver_path)
            .arg("--no-startup-with-shell")
            .arg("--once")
            .arg(format!(":{}", config.port))
            .arg(program)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut gdb = Command::new(&config.gdb_path)
            .arg("-i=mi")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let gdb_stdin = gdb.stdin.take().ok_or_else(|| pipe_error("gdb stdin"))?;
        let gdb_stdout = gdb.stdout.take().ok_or_else(|| pipe_error("gdb stdout"))?;
        let server_stdin = server
            .stdin
            .take()
            .ok_or_else(|| pipe_error("gdbserver stdin"))?;
        let server_stdout = server
            .stdout
            .take()
            .ok_or_else(|| pipe_error("gdbserver stdout"))?;
        let server_stderr = server
            .stderr
            .take()
            .ok_or_else(|| pipe_error("gdbserver stderr"))?;

        // gdb stdout: frame into batches, dispatch each, and at EOF flush
        // the remainder so an abrupt end still resumes any waiting caller.
        tokio::spawn(async move {
            let mut stdout = gdb_stdout;
            let mut framer = StreamFramer::new();
            let mut buf = [0u8; 4096];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let batches = framer.push(&buf[..n]);
                        let mut dispatcher = dispatcher.lock().unwrap();
                        for batch in batches {
                            dispatcher.process_batch(batch);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "error reading gdb stdout");
                        break;
                    }
                }
            }
            let mut dispatcher = dispatcher.lock().unwrap();
            if let Some(batch) = framer.finish() {
                dispatcher.process_batch(batch);
            }
            dispatcher.close();
            info!("gdb output pump stopped");
        });

        // Command writer: one MI command line per message.
        let (commands, mut command_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut stdin = gdb_stdin;
            while let Some(line) = command_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdin.flush().await;
            }
        });

        // gdbserver output passthrough.
        spawn_passthrough(server_stdout, events.clone(), SessionEvent::TargetStdout);
        spawn_passthrough(server_stderr, events, SessionEvent::TargetStderr);

        // Debuggee stdin feeder.
        let (target_stdin, mut target_rx) = mpsc::unbounded_channel::<TargetInput>();
        tokio::spawn(async move {
            let mut stdin = server_stdin;
            while let Some(input) = target_rx.recv().await {
                match input {
                    TargetInput::Data(text) => {
                        if stdin.write_all(text.as_bytes()).await.is_err() {
                            break;
                        }
                        let _ = stdin.flush().await;
                    }
                    TargetInput::Close => break,
                }
            }
            // Dropping the handle closes the debuggee's stdin.
        });

        Ok(Self {
            commands,
            target_stdin,
            gdb: Some(gdb),
            server: Some(server),
        })
    }

    /// Best-effort kill of both children.
    pub(crate) async fn shutdown(mut self) {
        if let Some(mut gdb) = self.gdb.take() {
            let _ = gdb.start_kill();
            let _ = gdb.wait().await;
        }
        if let Some(mut server) = self.server.take() {
            let _ = server.start_kill();
            let _ = server.wait().await;
        }
        info!("debugger processes stopped");
    }

    /// Channel-only handle with no backing processes, for exercising the
    /// session layer against scripted replies.
    #[cfg(test)]
    pub(crate) fn loopback() -> (
        Self,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedReceiver<TargetInput>,
    ) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (target_stdin, target_rx) = mpsc::unbounded_channel();
        (
            Self {
                commands,
                target_stdin,
                gdb: None,
                server: None,
            },
            command_rx,
            target_rx,
        )
    }
}

fn spawn_passthrough<R>(
    mut reader: R,
    events: mpsc::UnboundedSender<SessionEvent>,
    wrap: fn(String) -> SessionEvent,
) where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                    debug!(len = n, "target output chunk");
                    if events.send(wrap(text)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn pipe_error(what: &str) -> GdbError {
    GdbError::Io(std::io::Error::other(format!("{what} unavailable")))
}
