// AI analysis — prompt construction, response validation, cost estimation,
// and the requester that ties them to an LlmClient.

pub mod pricing;
pub mod prompt;
pub mod requester;
pub mod response;

pub use requester::AnalysisRequester;
