// LLM access — the completion trait and its Anthropic Messages API backend.

pub mod claude;
pub mod traits;
