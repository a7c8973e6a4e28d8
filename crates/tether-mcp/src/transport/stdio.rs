//! Stdio transport: a child process speaking newline-delimited JSON-RPC.

use super::{INBOUND_CAPACITY, TransportEvent, parse_inbound_frame};
use crate::config::ServerEntry;
use crate::error::McpError;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Delay after spawn before the handshake, so the child can bring its
/// stdin loop up.
const STARTUP_SETTLE: Duration = Duration::from_millis(100);

/// How long a closing child gets to exit on its own before the kill.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Transport over a spawned child process: stdout carries line-delimited
/// JSON inbound, stdin receives one serialized message per line, stderr
/// is drained into the log.
pub struct StdioTransport {
    name: String,
    write_tx: Option<mpsc::Sender<String>>,
    child: Arc<Mutex<Child>>,
    reader_handle: JoinHandle<()>,
    stderr_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl StdioTransport {
    /// Spawn the configured command and start the reader/writer tasks.
    pub async fn spawn(
        entry: &ServerEntry,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), McpError> {
        let command = entry.command.as_deref().unwrap_or("");
        let (program, args) = shell_invocation(command, &entry.args);

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .envs(&entry.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            command: command.to_string(),
            source: e,
        })?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        // Writer task: drains channel and writes to child stdin
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Reader task: reads lines from stdout and pushes frames inbound.
        // Stream end means the process died; the owning client learns of it
        // through the Closed event.
        let name = entry.name.clone();
        let reader_name = name.clone();
        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(frame) = parse_inbound_frame(&reader_name, &line) {
                    if inbound_tx.send(TransportEvent::Message(frame)).await.is_err() {
                        return;
                    }
                }
            }
            let _ = inbound_tx.send(TransportEvent::Closed).await;
        });

        // Stderr task: drain and log
        let stderr_name = name.clone();
        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!("[{stderr_name} stderr] {line}");
            }
        });

        tokio::time::sleep(STARTUP_SETTLE).await;

        Ok((
            Self {
                name,
                write_tx: Some(write_tx),
                child: Arc::new(Mutex::new(child)),
                reader_handle,
                stderr_handle,
                writer_handle,
            },
            inbound_rx,
        ))
    }

    /// Send one JSON value as a line on the child's stdin.
    pub async fn send(&self, message: &serde_json::Value) -> Result<(), McpError> {
        let serialized = serde_json::to_string(message)?;
        let tx = self.write_tx.as_ref().ok_or(McpError::ConnectionClosed)?;
        tx.send(serialized)
            .await
            .map_err(|_| McpError::ConnectionClosed)
    }

    /// Close stdin, give the child a grace period to exit, then kill it.
    pub async fn close(&mut self) {
        // Dropping the write channel sends EOF to the child's stdin
        drop(self.write_tx.take());

        let graceful = tokio::time::timeout(CLOSE_GRACE, async {
            let mut child = self.child.lock().await;
            let _ = child.wait().await;
        })
        .await;

        if graceful.is_err() {
            tracing::debug!("MCP server '{}' did not exit in time, killing", self.name);
            let mut child = self.child.lock().await;
            let _ = child.kill().await;
        }

        self.reader_handle.abort();
        self.stderr_handle.abort();
        self.writer_handle.abort();
    }
}

/// Resolve the program and argument list for the platform.
///
/// On Windows a bare command is wrapped as `cmd /C <command> <args...>` so
/// `.cmd`/`.bat` shims resolve through %PATH%.
fn shell_invocation(command: &str, args: &[String]) -> (String, Vec<String>) {
    if cfg!(windows) && !is_shell_invocation(command) {
        wrap_with_cmd(command, args)
    } else {
        (command.to_string(), args.to_vec())
    }
}

/// Whether the command already is a shell invocation.
fn is_shell_invocation(command: &str) -> bool {
    let base = command.rsplit(['/', '\\']).next().unwrap_or(command);
    base.eq_ignore_ascii_case("cmd") || base.eq_ignore_ascii_case("cmd.exe")
}

fn wrap_with_cmd(command: &str, args: &[String]) -> (String, Vec<String>) {
    let mut wrapped = Vec::with_capacity(args.len() + 2);
    wrapped.push("/C".to_string());
    wrapped.push(command.to_string());
    wrapped.extend(args.iter().cloned());
    ("cmd".to_string(), wrapped)
}
