//! These models represent the objects passed around by the gateway
//!
//! There are several different related formats we need to interact with:
//! - chat requests, sent from the client to the gateway
//! - openai, anthropic and gemini streaming payloads, sent between the gateway and the LLM
//! - the canonical chunk sequence every provider adapter produces
//! - SSE events, sent from the gateway back to the client
//!
//! Vendor formats never leak past the adapters. We immediately convert them into the
//! internal structs below, so the orchestrator only ever sees [`chunk::ChatChunk`]s.
pub mod chunk;
pub mod event;
pub mod message;
pub mod request;
pub mod role;
pub mod tool;
