use std::process::Stdio;

use anyhow::anyhow;
use async_stream::try_stream;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::LinesStream;
use tracing::debug;

use super::base::{ChunkStream, Provider};
use super::configs::AgentProviderConfig;
use super::factory::ProviderKind;
use super::utils::{disabled_stream, into_chunk_stream};
use crate::models::chunk::{ChatChunk, FinishReason};
use crate::models::message::Message;
use crate::models::request::ChatRequest;
use crate::models::role::Role;

const STDERR_EXCERPT_CHARS: usize = 300;

/// Wraps a local agent CLI. The conversation is passed as the final argument
/// and every stdout line becomes a text delta.
#[derive(Debug, Clone)]
pub struct AgentProvider {
    config: AgentProviderConfig,
    available: bool,
}

impl AgentProvider {
    pub fn new(config: AgentProviderConfig) -> Self {
        let available = which::which(&config.command).is_ok();
        debug!(command = %config.command, available, "agent cli lookup");
        Self { config, available }
    }

    /// Render the conversation as a single prompt
    fn flatten(messages: &[Message]) -> String {
        if let [only] = messages {
            if only.role == Role::User {
                return only.content.clone();
            }
        }

        messages
            .iter()
            .map(|message| {
                let label = match message.role {
                    Role::System => "System",
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                    Role::Tool => "Tool result",
                };
                format!("{}: {}", label, message.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Provider for AgentProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Agent
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_configured(&self) -> bool {
        self.available
    }

    fn chat(&self, request: &ChatRequest) -> ChunkStream {
        if !self.available {
            return disabled_stream(
                self.kind(),
                &format!("agent CLI '{}' was not found", self.config.command),
            );
        }

        let command = self.config.command.clone();
        let args = self.config.args.clone();
        let prompt = Self::flatten(&request.messages);

        into_chunk_stream(
            self.kind(),
            try_stream! {
                let mut child = Command::new(&command)
                    .args(&args)
                    .arg(&prompt)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| anyhow!("failed to start '{}': {}", command, e))?;

                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| anyhow!("agent stdout was not captured"))?;
                let mut stderr = child
                    .stderr
                    .take()
                    .ok_or_else(|| anyhow!("agent stderr was not captured"))?;
                // a full stderr pipe would stall the child, so drain it alongside stdout
                let stderr_task = tokio::spawn(async move {
                    let mut buffer = String::new();
                    let _ = stderr.read_to_string(&mut buffer).await;
                    buffer
                });

                let mut lines = LinesStream::new(BufReader::new(stdout).lines());
                while let Some(line) = lines.next().await {
                    let line = line.map_err(|e| anyhow!("reading agent output: {}", e))?;
                    yield ChatChunk::text(format!("{}\n", line));
                }

                let status = child
                    .wait()
                    .await
                    .map_err(|e| anyhow!("waiting for agent: {}", e))?;
                if !status.success() {
                    let stderr = stderr_task.await.unwrap_or_default();
                    let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT_CHARS).collect();
                    Err(anyhow!("agent exited with {}: {}", status, excerpt))?;
                }

                yield ChatChunk::finish(FinishReason::Stop);
            },
        )
    }
}
