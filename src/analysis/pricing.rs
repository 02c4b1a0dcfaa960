// Token cost estimation. Prices are USD per million tokens.

use crate::config::ModelSpec;
use crate::llm::traits::Usage;

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// Estimated USD cost of one completion.
pub fn estimate_cost(usage: Usage, model: &ModelSpec) -> f64 {
    (usage.input_tokens as f64 * model.input_per_mtok
        + usage.output_tokens as f64 * model.output_per_mtok)
        / TOKENS_PER_MILLION
}
