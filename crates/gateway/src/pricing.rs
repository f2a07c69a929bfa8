use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::providers::factory::ProviderKind;

/// USD per 1K tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPrice {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Always finite and non-negative
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let cost = (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k;
        if cost.is_finite() && cost > 0.0 {
            cost
        } else {
            0.0
        }
    }
}

const SONNET: ModelPrice = ModelPrice::new(0.003, 0.015);

const DEFAULT_PRICES: &[(ProviderKind, &str, ModelPrice)] = &[
    (ProviderKind::OpenAi, "gpt-4o", ModelPrice::new(0.0025, 0.01)),
    (ProviderKind::OpenAi, "gpt-4o-mini", ModelPrice::new(0.00015, 0.0006)),
    (ProviderKind::Anthropic, "claude-3-5-sonnet", SONNET),
    (ProviderKind::Anthropic, "claude-3-haiku", ModelPrice::new(0.00025, 0.00125)),
    (ProviderKind::Anthropic, "claude-3-opus", ModelPrice::new(0.015, 0.075)),
    (ProviderKind::Gemini, "gemini-1.5-pro", ModelPrice::new(0.00125, 0.005)),
    (ProviderKind::Gemini, "gemini-1.5-flash", ModelPrice::new(0.000075, 0.0003)),
];

/// Provider/model price lookup: exact model, then the longest known prefix,
/// then the provider's fallback rate.
#[derive(Debug, Clone)]
pub struct PricingTable {
    models: HashMap<ProviderKind, Vec<(String, ModelPrice)>>,
    fallback: HashMap<ProviderKind, ModelPrice>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut table = Self {
            models: HashMap::new(),
            fallback: HashMap::from([
                (ProviderKind::Mock, ModelPrice::default()),
                (ProviderKind::OpenAi, ModelPrice::new(0.0025, 0.01)),
                (ProviderKind::Anthropic, SONNET),
                (ProviderKind::Gemini, ModelPrice::new(0.00125, 0.005)),
                (ProviderKind::Agent, SONNET),
            ]),
        };
        for (provider, model, price) in DEFAULT_PRICES {
            table = table.with_price(*provider, model, *price);
        }
        table
    }
}

impl PricingTable {
    pub fn with_price(mut self, provider: ProviderKind, model: &str, price: ModelPrice) -> Self {
        let entries = self.models.entry(provider).or_default();
        entries.retain(|(known, _)| known != model);
        entries.push((model.to_string(), price));
        self
    }

    pub fn price(&self, provider: ProviderKind, model: &str) -> ModelPrice {
        let model = model.to_lowercase();
        let entries = self.models.get(&provider).map(Vec::as_slice).unwrap_or_default();

        entries
            .iter()
            .find(|(known, _)| *known == model)
            .or_else(|| {
                entries
                    .iter()
                    .filter(|(known, _)| model.starts_with(known.as_str()))
                    .max_by_key(|(known, _)| known.len())
            })
            .map(|(_, price)| *price)
            .or_else(|| self.fallback.get(&provider).copied())
            .unwrap_or_default()
    }

    pub fn cost(
        &self,
        provider: ProviderKind,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
    ) -> f64 {
        self.price(provider, model).cost(input_tokens, output_tokens)
    }
}
