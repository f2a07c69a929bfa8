use std::collections::HashMap;
use std::sync::Arc;

use tiktoken_rs::CoreBPE;
use tracing::warn;

use crate::models::message::Message;
use crate::models::tool::ToolSpec;

const O200K_BASE: &str = "o200k_base";
const CL100K_BASE: &str = "cl100k_base";

/// Fixed overhead of the chat framing around each message
const TOKENS_PER_MESSAGE: usize = 4;
/// Every reply is primed with the assistant header
const REPLY_PRIMING_TOKENS: usize = 3;

/// Token counts for when a provider reports no usage.
///
/// Uses the BPE tables bundled with `tiktoken-rs`. Models without a public
/// tokenizer (Claude, Gemini, local agents) are counted with `cl100k_base`,
/// which is close enough for budgeting and cost reporting.
#[derive(Clone)]
pub struct TokenCounter {
    encoders: HashMap<&'static str, Arc<CoreBPE>>,
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter {
    pub fn new() -> Self {
        let mut counter = TokenCounter {
            encoders: HashMap::new(),
        };
        counter.load_encoder(O200K_BASE, tiktoken_rs::o200k_base);
        counter.load_encoder(CL100K_BASE, tiktoken_rs::cl100k_base);
        counter
    }

    fn load_encoder(&mut self, key: &'static str, load: fn() -> anyhow::Result<CoreBPE>) {
        match load() {
            Ok(bpe) => {
                self.encoders.insert(key, Arc::new(bpe));
            }
            Err(e) => warn!(encoding = key, error = %e, "failed to load tokenizer"),
        }
    }

    fn encoding_for(model_name: Option<&str>) -> &'static str {
        let model_name = model_name.unwrap_or("gpt-4o").to_lowercase();
        let o200k_families = ["gpt-4o", "gpt-4.1", "gpt-5", "chatgpt-4o", "o1", "o3", "o4"];
        if o200k_families
            .iter()
            .any(|family| model_name.starts_with(family))
        {
            O200K_BASE
        } else {
            CL100K_BASE
        }
    }

    pub fn count_tokens(&self, text: &str, model_name: Option<&str>) -> usize {
        if text.is_empty() {
            return 0;
        }
        let key = Self::encoding_for(model_name);
        match self
            .encoders
            .get(key)
            .or_else(|| self.encoders.values().next())
        {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.len() / 4 + 1,
        }
    }

    /// Count the prompt size of a whole conversation, tools included
    pub fn count_chat_tokens(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        model_name: Option<&str>,
    ) -> usize {
        let message_tokens: usize = messages
            .iter()
            .map(|message| {
                let calls: usize = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        self.count_tokens(&call.name, model_name)
                            + self.count_tokens(&call.arguments.to_string(), model_name)
                    })
                    .sum();
                TOKENS_PER_MESSAGE + self.count_tokens(&message.content, model_name) + calls
            })
            .sum();

        let tool_tokens: usize = tools
            .iter()
            .map(|tool| {
                self.count_tokens(&tool.name, model_name)
                    + self.count_tokens(&tool.description, model_name)
                    + self.count_tokens(&tool.parameters.to_string(), model_name)
            })
            .sum();

        message_tokens + tool_tokens + REPLY_PRIMING_TOKENS
    }
}
