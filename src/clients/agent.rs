//! Subprocess AI backend speaking the stream-json protocol.
//!
//! Spawns the configured agent command, writes the instruction to stdin, and
//! exposes stdout lines as a stream of `AgentEvent`s. Lines that fail to
//! decode become item-level `Decode` errors so the consumer can isolate them
//! without losing the rest of the stream.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::clients::{AgentBackend, EventStream};
use crate::errors::AgentError;
use crate::stream::AgentEvent;

pub struct CliAgent {
    cmd: String,
}

impl CliAgent {
    pub fn new(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
        }
    }
}

#[async_trait]
impl AgentBackend for CliAgent {
    async fn stream(
        &self,
        instruction: &str,
        allowed_tools: &[String],
    ) -> Result<EventStream, AgentError> {
        let mut command = Command::new(&self.cmd);
        command.args(["--print", "--output-format", "stream-json"]);
        if !allowed_tools.is_empty() {
            command.arg("--allowed-tools").arg(allowed_tools.join(","));
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        debug!(cmd = %self.cmd, tools = %allowed_tools.join(","), "spawning agent");
        let mut child = command.spawn().map_err(AgentError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(instruction.as_bytes())
                .await
                .map_err(|e| AgentError::Transport(format!("failed to write instruction: {}", e)))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| AgentError::Transport(format!("failed to close stdin: {}", e)))?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Transport("agent process has no stdout".to_string()))?;

        let (tx, rx) = mpsc::channel::<Result<AgentEvent, AgentError>>(64);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        let item = serde_json::from_str::<AgentEvent>(trimmed).map_err(|e| {
                            AgentError::Decode(format!(
                                "{} in line: {:.120}",
                                e, trimmed
                            ))
                        });
                        if tx.send(item).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx
                            .send(Err(AgentError::Transport(format!(
                                "stdout read failed: {}",
                                e
                            ))))
                            .await;
                        break;
                    }
                }
            }
            // Reap the child so it doesn't linger as a zombie.
            let _ = child.wait().await;
        });

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}
