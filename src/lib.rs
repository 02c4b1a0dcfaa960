// repo-scout: tiered GitHub scanning and LLM investment scoring
//
// This is the library root. Each module corresponds to a major subsystem
// of the scan pipeline.

pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod github;
pub mod http;
pub mod llm;
pub mod output;
pub mod pipeline;
pub mod rate_limit;
pub mod scoring;
pub mod status;
