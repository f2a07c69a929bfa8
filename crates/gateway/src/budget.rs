//! Per-persona admission control.
//!
//! Each persona gets a tumbling one-minute window with three counters
//! (requests, tokens, cost). A request reserves its estimate up front and
//! the reservation is later reconciled with what was actually used.
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;

pub const ANONYMOUS_PERSONA: &str = "anonymous";
const WINDOW: Duration = Duration::from_secs(60);

/// Per-minute limits; zero disables a limit
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetLimits {
    #[serde(default)]
    pub requests_per_minute: u64,
    #[serde(default)]
    pub tokens_per_minute: u64,
    #[serde(default)]
    pub cost_per_minute: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BudgetLimit {
    Requests,
    Tokens,
    Cost,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Budget exceeded for persona '{persona}': {limit} limit of {max} per minute reached")]
pub struct BudgetExceeded {
    pub persona: String,
    pub limit: BudgetLimit,
    pub max: f64,
}

/// Counters for the persona's current window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PersonaUsage {
    pub requests: u64,
    pub tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug)]
struct PersonaBudgetState {
    usage: PersonaUsage,
    window_start: Instant,
}

/// Budget held by an admitted request until it is reconciled.
///
/// Dropping it without reconciling leaves the estimate in place.
#[derive(Debug)]
#[must_use = "reconcile the reservation once actual usage is known"]
pub struct Reservation {
    persona: String,
    window_start: Instant,
    tokens: u64,
    cost_usd: f64,
}

/// Normalize an optional persona id
pub fn persona_id(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(ANONYMOUS_PERSONA)
        .to_string()
}

#[derive(Debug)]
pub struct BudgetGate {
    limits: BudgetLimits,
    window: Duration,
    personas: DashMap<String, PersonaBudgetState>,
}

impl BudgetGate {
    pub fn new(limits: BudgetLimits) -> Self {
        Self::with_window(limits, WINDOW)
    }

    pub fn with_window(limits: BudgetLimits, window: Duration) -> Self {
        Self {
            limits,
            window,
            personas: DashMap::new(),
        }
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    /// Admit a request and reserve its estimated tokens and cost.
    ///
    /// The check and the update happen under the persona's entry lock, so
    /// concurrent requests for one persona cannot both squeeze under a limit.
    pub fn check_and_reserve(
        &self,
        persona: &str,
        estimated_tokens: u64,
        estimated_cost: f64,
    ) -> Result<Reservation, BudgetExceeded> {
        let now = Instant::now();
        let mut state = self
            .personas
            .entry(persona.to_string())
            .or_insert_with(|| PersonaBudgetState {
                usage: PersonaUsage::default(),
                window_start: now,
            });

        if now.duration_since(state.window_start) >= self.window {
            state.usage = PersonaUsage::default();
            state.window_start = now;
        }

        let exceeded = |limit: BudgetLimit, max: f64| BudgetExceeded {
            persona: persona.to_string(),
            limit,
            max,
        };
        let limits = &self.limits;
        let usage = &state.usage;

        if limits.requests_per_minute > 0 && usage.requests + 1 > limits.requests_per_minute {
            return Err(exceeded(
                BudgetLimit::Requests,
                limits.requests_per_minute as f64,
            ));
        }
        if limits.tokens_per_minute > 0
            && usage.tokens.saturating_add(estimated_tokens) > limits.tokens_per_minute
        {
            return Err(exceeded(BudgetLimit::Tokens, limits.tokens_per_minute as f64));
        }
        if limits.cost_per_minute > 0.0 && usage.cost_usd + estimated_cost > limits.cost_per_minute {
            return Err(exceeded(BudgetLimit::Cost, limits.cost_per_minute));
        }

        state.usage.requests += 1;
        state.usage.tokens = state.usage.tokens.saturating_add(estimated_tokens);
        state.usage.cost_usd += estimated_cost;

        Ok(Reservation {
            persona: persona.to_string(),
            window_start: state.window_start,
            tokens: estimated_tokens,
            cost_usd: estimated_cost,
        })
    }

    /// Replace a reservation's estimate with the actual usage. Does nothing
    /// once the window the reservation was made in has rolled over.
    pub fn reconcile(&self, reservation: Reservation, actual_tokens: u64, actual_cost: f64) {
        let Some(mut state) = self.personas.get_mut(&reservation.persona) else {
            return;
        };
        if state.window_start != reservation.window_start {
            return;
        }

        state.usage.tokens = state
            .usage
            .tokens
            .saturating_sub(reservation.tokens)
            .saturating_add(actual_tokens);
        state.usage.cost_usd = (state.usage.cost_usd - reservation.cost_usd + actual_cost).max(0.0);
    }

    /// Counters for the persona's current window
    pub fn snapshot(&self, persona: &str) -> PersonaUsage {
        self.personas
            .get(persona)
            .filter(|state| state.window_start.elapsed() < self.window)
            .map(|state| state.usage)
            .unwrap_or_default()
    }

    /// Drop personas whose window ended long ago
    pub fn gc(&self) {
        let now = Instant::now();
        self.personas
            .retain(|_, state| now.duration_since(state.window_start) < self.window * 2);
    }
}
