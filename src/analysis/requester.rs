// Analysis requester — picks a model, sends the prompt, validates the reply,
// and prices the call.
//
// The requester never persists anything and never touches the rate limiter.
// The orchestrator reserves tokens before calling it and stores the result.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::pricing::estimate_cost;
use super::prompt::build_prompt;
use super::response::parse_analysis;
use crate::config::{ModelCatalog, ModelSelection, ModelSpec};
use crate::db::models::{Analysis, Repository, TierAssignment};
use crate::error::ScanError;
use crate::llm::traits::LlmClient;

pub struct AnalysisRequester {
    llm: Arc<dyn LlmClient>,
    catalog: ModelCatalog,
    selection: ModelSelection,
}

impl AnalysisRequester {
    pub fn new(llm: Arc<dyn LlmClient>, catalog: ModelCatalog, selection: ModelSelection) -> Self {
        Self {
            llm,
            catalog,
            selection,
        }
    }

    /// Choose a model from a repository's tier assignment.
    ///
    /// Fast growth escalates straight to the premium model; otherwise scan
    /// priority decides. A repository without an assignment gets economy.
    pub fn select_model(&self, assignment: Option<&TierAssignment>) -> &ModelSpec {
        let Some(a) = assignment else {
            return &self.catalog.economy;
        };
        let s = &self.selection;

        if a.growth_velocity >= s.escalation_growth || a.scan_priority >= s.premium_min_priority {
            &self.catalog.premium
        } else if a.scan_priority >= s.standard_min_priority {
            &self.catalog.standard
        } else {
            &self.catalog.economy
        }
    }

    /// Analyze one repository. An empty `readme` is allowed.
    pub async fn analyze(
        &self,
        repo: &Repository,
        readme: &str,
        model: &ModelSpec,
    ) -> Result<Analysis, ScanError> {
        let prompt = build_prompt(repo, readme, self.selection.readme_max_chars);

        debug!(
            repo_id = repo.id,
            model = %model.id,
            prompt_chars = prompt.len(),
            "Requesting analysis"
        );

        let completion = self
            .llm
            .complete(&prompt, &model.id, self.selection.max_tokens)
            .await?;

        if completion.stop_reason.as_deref() == Some("max_tokens") {
            warn!(repo_id = repo.id, model = %model.id, "Analysis hit max_tokens");
        }

        let parsed = parse_analysis(&completion.text)?;
        let cost_usd = estimate_cost(completion.usage, model);

        Ok(Analysis {
            id: None,
            repo_id: repo.id,
            model: model.id.clone(),
            scores: parsed.scores,
            overall_score: parsed.overall_score,
            recommendation: parsed.recommendation,
            summary: parsed.summary,
            strengths: parsed.strengths,
            risks: parsed.risks,
            questions: parsed.questions,
            growth_prediction: parsed.growth_prediction,
            investment_thesis: parsed.investment_thesis,
            competitive_analysis: parsed.competitive_analysis,
            input_tokens: completion.usage.input_tokens,
            output_tokens: completion.usage.output_tokens,
            cost_usd,
            created_at: Utc::now(),
        })
    }
}
