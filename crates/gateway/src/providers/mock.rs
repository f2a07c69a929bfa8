use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::json;

use super::base::{ChunkStream, Provider};
use super::factory::ProviderKind;
use crate::models::chunk::{ChatChunk, FinishReason};
use crate::models::request::ChatRequest;

pub const MOCK_MODEL: &str = "mock-echo";
pub const TOOL_MARKER: &str = "CALL_TOOL:";

const JSON_CHUNK_CHARS: usize = 8;

/// A provider that derives its output from the input, for local runs and tests.
///
/// Without a script it echoes the last user message word by word. With a
/// script it replays one pre-configured turn per call.
#[derive(Debug, Clone)]
pub struct MockProvider {
    model: String,
    script: Option<Arc<Mutex<VecDeque<Vec<ChatChunk>>>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            model: MOCK_MODEL.to_string(),
            script: None,
        }
    }

    /// Replay the given turns in order, one per `chat` call
    pub fn scripted(turns: Vec<Vec<ChatChunk>>) -> Self {
        Self {
            model: MOCK_MODEL.to_string(),
            script: Some(Arc::new(Mutex::new(turns.into()))),
        }
    }

    fn next_scripted_turn(script: &Mutex<VecDeque<Vec<ChatChunk>>>) -> Vec<ChatChunk> {
        let mut turn = script
            .lock()
            .ok()
            .and_then(|mut turns| turns.pop_front())
            .unwrap_or_default();
        if !turn.last().is_some_and(ChatChunk::is_finish) {
            turn.push(ChatChunk::finish(FinishReason::Stop));
        }
        turn
    }

    fn echo(text: &str) -> Vec<ChatChunk> {
        let (markers, prose): (Vec<&str>, Vec<&str>) = text
            .lines()
            .partition(|line| line.trim_start().starts_with(TOOL_MARKER));

        let mut chunks = vec![ChatChunk::text("Echo:")];
        chunks.extend(
            prose
                .iter()
                .flat_map(|line| line.split_whitespace())
                .map(|word| ChatChunk::text(format!(" {}", word))),
        );
        chunks.extend(
            markers
                .iter()
                .map(|line| ChatChunk::text(format!("\n{}\n", line.trim()))),
        );
        chunks.push(ChatChunk::finish(FinishReason::Stop));
        chunks
    }

    fn echo_json(text: &str) -> Vec<ChatChunk> {
        let payload = json!({ "provider": "mock", "echo": text }).to_string();
        let chars: Vec<char> = payload.chars().collect();

        let mut chunks: Vec<ChatChunk> = chars
            .chunks(JSON_CHUNK_CHARS)
            .map(|piece| ChatChunk::text(piece.iter().collect::<String>()))
            .collect();
        chunks.push(ChatChunk::finish(FinishReason::Stop));
        chunks
    }
}

impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn chat(&self, request: &ChatRequest) -> ChunkStream {
        let chunks = match &self.script {
            Some(script) => Self::next_scripted_turn(script),
            None if request.wants_json() => Self::echo_json(request.last_user_text()),
            None => Self::echo(request.last_user_text()),
        };
        Box::pin(futures::stream::iter(chunks))
    }
}
