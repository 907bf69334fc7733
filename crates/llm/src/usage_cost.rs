//! Token estimation fallback and cost computation, shared by the dispatcher's
//! hot path and the finalization worker's background pass.

use crate::canonical::{CanonicalMessage, CanonicalUsage};
use crate::registry::ProviderMapping;

/// Estimates prompt tokens when a provider omits them. Tries a tokenizer
/// first; if that fails, falls back to `max(1, chars / 4)`.
pub fn estimate_prompt_tokens(messages: &[CanonicalMessage]) -> u32 {
    let joined: String = messages
        .iter()
        .filter_map(|m| m.content.as_ref().map(|c| c.as_text()))
        .collect::<Vec<_>>()
        .join("\n");

    match tiktoken_rs::cl100k_base() {
        Ok(bpe) => bpe.encode_ordinary(&joined).len() as u32,
        Err(_) => estimate_by_chars(&joined),
    }
}

/// Used for Google's completion-token fallback when `candidatesTokenCount`
/// is absent but content was produced.
pub fn estimate_completion_tokens(full_content: &str) -> u32 {
    match tiktoken_rs::cl100k_base() {
        Ok(bpe) => bpe.encode_ordinary(full_content).len() as u32,
        Err(_) => estimate_by_chars(full_content),
    }
}

fn estimate_by_chars(text: &str) -> u32 {
    (text.chars().count() as u32 / 4).max(1)
}

/// Character count of every message's text content, joined the same way
/// [`estimate_prompt_tokens`] does. Kept on a `LogRecord` instead of the
/// content itself so the Finalization Worker can estimate later without the
/// gateway ever persisting full prompt text.
pub fn prompt_char_count(messages: &[CanonicalMessage]) -> u32 {
    messages.iter().filter_map(|m| m.content.as_ref().map(|c| c.as_text().chars().count() as u32)).sum()
}

/// `max(1, round(chars/4))`, the same heuristic [`estimate_prompt_tokens`]
/// and [`estimate_completion_tokens`] fall back to, applied to a character
/// count recorded earlier instead of the original text.
pub fn estimate_tokens_from_chars(chars: u32) -> u32 {
    (chars / 4).max(1)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Cost {
    /// Combined cost of every prompt token, cached and uncached.
    pub input_cost: f64,
    /// The portion of `input_cost` attributable to cached tokens.
    pub cached_input_cost: f64,
    pub output_cost: f64,
    pub request_cost: f64,
    pub total: f64,
}

/// Computes cost from finalized token counts and a mapping's pricing.
pub fn compute_cost(usage: &CanonicalUsage, mapping: &ProviderMapping) -> Cost {
    let cached = usage.cached_tokens.min(usage.prompt_tokens);
    let uncached = usage.prompt_tokens - cached;

    let cached_price = mapping.cached_input_price_per_token.unwrap_or(mapping.input_price_per_token);

    let cached_input_cost = cached as f64 * cached_price;
    let input_cost = uncached as f64 * mapping.input_price_per_token + cached_input_cost;
    let output_cost = (usage.completion_tokens + usage.reasoning_tokens) as f64 * mapping.output_price_per_token;
    let request_cost = mapping.request_price;

    let total = (input_cost + output_cost + request_cost) * mapping.discount;

    Cost { input_cost, cached_input_cost, output_cost, request_cost, total }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> ProviderMapping {
        ProviderMapping {
            provider_id: "openai".to_owned(),
            upstream_model_name: "gpt-4o".to_owned(),
            input_price_per_token: 0.000002,
            output_price_per_token: 0.00001,
            cached_input_price_per_token: Some(0.000001),
            request_price: 0.0,
            discount: 1.0,
            context_size: 128_000,
            max_output_tokens: 4096,
            supports_streaming: true,
            supports_vision: true,
            supports_tools: true,
            supports_reasoning: false,
            supported_parameters: vec![],
        }
    }

    #[test]
    fn cost_is_monotonic_in_price() {
        let usage = CanonicalUsage { prompt_tokens: 100, completion_tokens: 50, total_tokens: 150, ..Default::default() };

        let cheap = compute_cost(&usage, &mapping());

        let mut pricier = mapping();
        pricier.output_price_per_token *= 2.0;
        let expensive = compute_cost(&usage, &pricier);

        assert!(expensive.total > cheap.total);
    }

    #[test]
    fn cached_tokens_use_the_discounted_price() {
        let usage = CanonicalUsage {
            prompt_tokens: 100,
            cached_tokens: 40,
            completion_tokens: 0,
            total_tokens: 100,
            ..Default::default()
        };

        let cost = compute_cost(&usage, &mapping());
        let expected = 60.0 * 0.000002 + 40.0 * 0.000001;
        assert!((cost.input_cost - expected).abs() < f64::EPSILON);
    }
}
