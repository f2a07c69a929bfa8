//! The request lifecycle: admission, the provider stream, inline tool
//! dispatch, usage accounting and the terminal event.
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::budget::{persona_id, BudgetGate, BudgetLimits, Reservation};
use crate::capabilities::ensure_requirements;
use crate::errors::GatewayResult;
use crate::models::chunk::{ChatChunk, FinishReason};
use crate::models::event::{ErrorScope, GatewayEvent, UsageReport};
use crate::models::message::Message;
use crate::models::request::ChatRequest;
use crate::models::tool::ToolCall;
use crate::pricing::PricingTable;
use crate::providers::base::{Provider, Usage};
use crate::providers::factory::{Adapter, ProviderKind, ProviderRouter};
use crate::token_counter::TokenCounter;
use crate::tools::{ToolBridge, ToolContext, ToolError, ToolResult};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
/// Completion size assumed for budgeting when the request sets no `max_tokens`
const DEFAULT_COMPLETION_ESTIMATE: u32 = 256;
/// Stands in for a deadline too far away to represent
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

lazy_static! {
    static ref TOOL_MARKER: Regex =
        Regex::new(r"^\s*CALL_TOOL:\s*([A-Za-z0-9_.\-]+)\s*(.*)$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayOptions {
    /// Provider turns allowed after the first one for native tool calls
    pub max_tool_rounds: usize,
    pub request_timeout: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Streaming,
    ToolDispatch,
    Errored,
    UsageReported,
    Done,
}

/// A request that passed validation, requirement checks and the budget gate
#[derive(Debug)]
pub struct Admission {
    pub request_id: String,
    pub persona: String,
    pub provider: ProviderKind,
    pub model: String,
    request: ChatRequest,
    adapter: Adapter,
    reservation: Reservation,
}

pub struct Gateway {
    router: ProviderRouter,
    bridge: Arc<ToolBridge>,
    budget: Arc<BudgetGate>,
    pricing: Arc<PricingTable>,
    counter: TokenCounter,
    options: GatewayOptions,
}

impl Gateway {
    pub fn new(router: ProviderRouter, bridge: Arc<ToolBridge>) -> Self {
        Self {
            router,
            bridge,
            budget: Arc::new(BudgetGate::new(BudgetLimits::default())),
            pricing: Arc::new(PricingTable::default()),
            counter: TokenCounter::new(),
            options: GatewayOptions::default(),
        }
    }

    pub fn with_budget(mut self, budget: BudgetGate) -> Self {
        self.budget = Arc::new(budget);
        self
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = Arc::new(pricing);
        self
    }

    pub fn with_options(mut self, options: GatewayOptions) -> Self {
        self.options = options;
        self
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn bridge(&self) -> &ToolBridge {
        &self.bridge
    }

    pub fn budget(&self) -> &BudgetGate {
        &self.budget
    }

    /// Run every check that must pass before anything is streamed.
    ///
    /// `provider` is an explicit override (e.g. a query parameter) and wins
    /// over the request body's own `provider` field.
    pub fn admit(
        &self,
        request: ChatRequest,
        provider: Option<&str>,
        persona: Option<&str>,
    ) -> GatewayResult<Admission> {
        request.validate()?;

        let kind = self
            .router
            .resolve(provider.or(request.provider.as_deref()));
        ensure_requirements(&kind.to_string(), &request.requires)?;

        let adapter = self.router.adapter(kind);
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| adapter.model().to_string());
        let persona = persona_id(persona);

        let prompt_tokens = token_count(self.counter.count_chat_tokens(
            &request.messages,
            &request.tools,
            Some(&model),
        ));
        let completion_tokens = request.max_tokens.unwrap_or(DEFAULT_COMPLETION_ESTIMATE);
        let estimated_cost = self
            .pricing
            .cost(kind, &model, prompt_tokens, completion_tokens);
        let reservation = self.budget.check_and_reserve(
            &persona,
            prompt_tokens as u64 + completion_tokens as u64,
            estimated_cost,
        )?;

        let request_id = uuid::Uuid::new_v4().to_string();
        info!(
            request_id = %request_id,
            provider = %kind,
            model = %model,
            persona = %persona,
            "chat request admitted"
        );

        Ok(Admission {
            request_id,
            persona,
            provider: kind,
            model,
            request,
            adapter,
            reservation,
        })
    }

    /// Admit and stream in one step
    pub fn chat(
        &self,
        request: ChatRequest,
        provider: Option<&str>,
        persona: Option<&str>,
    ) -> GatewayResult<BoxStream<'static, GatewayEvent>> {
        let admission = self.admit(request, provider, persona)?;
        Ok(self.stream(admission))
    }

    /// Drive an admitted request to completion as a sequence of events.
    ///
    /// The sequence always ends with exactly one `usage` followed by exactly
    /// one `done`. Dropping it stops the provider stream and any tool in
    /// flight.
    pub fn stream(&self, admission: Admission) -> BoxStream<'static, GatewayEvent> {
        let Admission {
            request_id,
            persona,
            provider,
            model,
            mut request,
            adapter,
            reservation,
        } = admission;
        let bridge = self.bridge.clone();
        let budget = self.budget.clone();
        let pricing = self.pricing.clone();
        let counter = self.counter.clone();
        let options = self.options;

        Box::pin(stream! {
            let deadline = request_deadline(options.request_timeout);
            let ctx = ToolContext::new(request_id.clone(), persona.clone());
            let marker_detection = !request.wants_json();

            let mut prompt_tokens: u32 = 0;
            let mut completion_tokens: u32 = 0;
            let mut rounds = 0;

            let finish_reason = 'turns: loop {
                let mut state = StreamState::Streaming;
                debug!(request_id = %request_id, ?state, round = rounds, "provider turn");

                let prompt_estimate = token_count(counter.count_chat_tokens(
                    &request.messages,
                    &request.tools,
                    Some(&model),
                ));
                let mut chunks = adapter.chat(&request);
                let mut scanner = MarkerScanner::default();
                let mut turn_text = String::new();
                let mut turn_call_tokens: u32 = 0;
                let mut native_calls: Vec<(ToolCall, ToolResult<Value>)> = Vec::new();
                let mut turn_finish: Option<(FinishReason, Option<Usage>)> = None;
                let mut timed_out = false;

                loop {
                    let mut pending: Vec<(ToolCall, bool)> = Vec::new();

                    match timeout_at(deadline, chunks.next()).await {
                        Err(_) => timed_out = true,
                        Ok(None) => turn_finish = Some((FinishReason::Stop, None)),
                        Ok(Some(ChatChunk::Text(text))) => {
                            turn_text.push_str(&text);
                            if marker_detection {
                                pending.extend(scanner.push(&text).into_iter().map(|c| (c, false)));
                            }
                            yield GatewayEvent::Token { text };
                        }
                        Ok(Some(ChatChunk::ToolCall(call))) => {
                            turn_call_tokens += token_count(
                                counter.count_tokens(&call.arguments.to_string(), Some(&model)),
                            );
                            pending.push((call, true));
                        }
                        Ok(Some(ChatChunk::Finish { reason, usage })) => {
                            turn_finish = Some((reason, usage));
                        }
                    }

                    if turn_finish.is_some() && marker_detection {
                        pending.extend(scanner.finish().into_iter().map(|c| (c, false)));
                    }

                    for (call, native) in pending {
                        if timed_out {
                            break;
                        }
                        state = StreamState::ToolDispatch;
                        debug!(request_id = %request_id, ?state, tool = %call.name, native, "dispatching tool");

                        yield GatewayEvent::ToolCall(call.clone());
                        let outcome = match timeout_at(deadline, invoke_tool(&bridge, &call, &ctx)).await {
                            Ok(outcome) => outcome,
                            Err(_) => {
                                timed_out = true;
                                Err(ToolError::ExecutionError(format!(
                                    "tool '{}' did not finish before the request deadline",
                                    call.name
                                )))
                            }
                        };
                        match &outcome {
                            Ok(result) => {
                                yield GatewayEvent::ToolResult {
                                    id: call.id.clone(),
                                    name: call.name.clone(),
                                    result: result.clone(),
                                };
                            }
                            Err(e) => {
                                warn!(request_id = %request_id, tool = %call.name, error = %e, "tool failed");
                                yield GatewayEvent::tool_error(&call, e.to_string());
                            }
                        }
                        if native {
                            native_calls.push((call, outcome));
                        }
                    }

                    if timed_out || turn_finish.is_some() {
                        break;
                    }
                }
                drop(chunks);

                let (reason, usage) = turn_finish.unwrap_or((FinishReason::Stop, None));
                let usage = usage.unwrap_or_default();
                prompt_tokens += usage.input_tokens.unwrap_or(prompt_estimate);
                completion_tokens += usage.output_tokens.unwrap_or_else(|| {
                    token_count(counter.count_tokens(&turn_text, Some(&model))) + turn_call_tokens
                });

                if timed_out {
                    state = StreamState::Errored;
                    warn!(request_id = %request_id, ?state, "request deadline exceeded");
                    yield GatewayEvent::error(
                        ErrorScope::Gateway,
                        format!(
                            "request timed out after {}s",
                            options.request_timeout.as_secs()
                        ),
                    );
                    break 'turns FinishReason::Error { message: String::new() }.as_str();
                }

                let finish = reason.as_str();
                match reason {
                    FinishReason::Disabled { message } | FinishReason::Error { message } => {
                        state = StreamState::Errored;
                        warn!(request_id = %request_id, ?state, provider = %provider, error = %message, "provider turn failed");
                        yield GatewayEvent::error(ErrorScope::Provider, message);
                        break 'turns finish;
                    }
                    FinishReason::ToolCalls if !native_calls.is_empty() => {
                        if rounds >= options.max_tool_rounds {
                            yield GatewayEvent::error(
                                ErrorScope::Gateway,
                                format!("tool round limit of {} reached", options.max_tool_rounds),
                            );
                            break 'turns finish;
                        }
                        rounds += 1;

                        let calls = native_calls.iter().map(|(call, _)| call.clone()).collect();
                        request
                            .messages
                            .push(Message::assistant(turn_text).with_tool_calls(calls));
                        for (call, outcome) in native_calls {
                            request.messages.push(Message::tool(call.id, tool_output(&outcome)));
                        }
                    }
                    _ => break 'turns finish,
                }
            };

            let total_tokens = prompt_tokens.saturating_add(completion_tokens);
            let cost_usd = pricing.cost(provider, &model, prompt_tokens, completion_tokens);
            budget.reconcile(reservation, total_tokens as u64, cost_usd);

            let state = StreamState::UsageReported;
            debug!(request_id = %request_id, ?state, total_tokens, cost_usd, "usage reported");
            yield GatewayEvent::Usage(UsageReport {
                provider: provider.to_string(),
                model: model.clone(),
                prompt_tokens,
                completion_tokens,
                total_tokens,
                cost_usd,
            });

            let state = StreamState::Done;
            info!(
                request_id = %request_id,
                ?state,
                finish_reason,
                total_tokens,
                cost_usd,
                "chat request finished"
            );
            yield GatewayEvent::Done {
                finish_reason: finish_reason.to_string(),
            };
        })
    }
}

/// Deadline for a request, clamped when the timeout cannot be represented
fn request_deadline(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

fn token_count(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Invoke a tool, turning a panicking handler into an execution error
async fn invoke_tool(bridge: &ToolBridge, call: &ToolCall, ctx: &ToolContext) -> ToolResult<Value> {
    AssertUnwindSafe(bridge.invoke(&call.name, call.arguments.clone(), ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(ToolError::ExecutionError(format!(
                "tool '{}' panicked",
                call.name
            )))
        })
}

/// What the model sees as the result of a native tool call
fn tool_output(outcome: &ToolResult<Value>) -> String {
    match outcome {
        Ok(value) => value.to_string(),
        Err(e) => format!("The tool call returned the following error:\n{}", e),
    }
}

/// Parse one `CALL_TOOL: <name> [<json args>]` line.
///
/// Arguments that are not a JSON object are wrapped as `{"input": ...}`.
pub fn parse_tool_marker(line: &str) -> Option<ToolCall> {
    let captures = TOOL_MARKER.captures(line)?;
    let name = captures.get(1)?.as_str();
    let rest = captures.get(2).map_or("", |m| m.as_str()).trim();

    let arguments = if rest.is_empty() {
        json!({})
    } else {
        match serde_json::from_str::<Value>(rest) {
            Ok(value) if value.is_object() => value,
            _ => json!({ "input": rest }),
        }
    };
    Some(ToolCall::generated(name, arguments))
}

/// Finds complete marker lines in streamed text
#[derive(Debug, Default)]
struct MarkerScanner {
    line: String,
}

impl MarkerScanner {
    fn push(&mut self, text: &str) -> Vec<ToolCall> {
        self.line.push_str(text);

        let mut calls = Vec::new();
        while let Some(pos) = self.line.find('\n') {
            let line: String = self.line.drain(..=pos).collect();
            calls.extend(parse_tool_marker(line.trim_end()));
        }
        calls
    }

    /// The final line counts as complete once the turn ends
    fn finish(&mut self) -> Vec<ToolCall> {
        let rest = std::mem::take(&mut self.line);
        parse_tool_marker(rest.trim_end()).into_iter().collect()
    }
}
