// Model response parsing and validation.
//
// The model is asked for a bare JSON object but often wraps it in a ```json
// fence or adds a sentence around it. We take the fenced block if there is
// one, else everything from the first '{' to the last '}'. Whatever we get
// must then pass validation in full: nothing is defaulted, and any problem
// becomes ScanError::ModelResponse carrying the raw text.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::Deserialize;

use crate::db::models::Recommendation;
use crate::error::ScanError;

pub const MIN_SCORES: usize = 4;
pub const MAX_SCORES: usize = 7;

/// The validated content of a model reply, before usage and cost are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnalysis {
    pub scores: BTreeMap<String, f64>,
    pub overall_score: f64,
    pub recommendation: Recommendation,
    pub summary: String,
    pub strengths: Vec<String>,
    pub risks: Vec<String>,
    pub questions: Vec<String>,
    pub growth_prediction: Option<String>,
    pub investment_thesis: Option<String>,
    pub competitive_analysis: Option<String>,
}

#[derive(Deserialize)]
struct RawAnalysis {
    scores: BTreeMap<String, f64>,
    recommendation: Recommendation,
    summary: String,
    strengths: Vec<String>,
    risks: Vec<String>,
    questions: Vec<String>,
    growth_prediction: Option<String>,
    investment_thesis: Option<String>,
    competitive_analysis: Option<String>,
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").ok())
        .as_ref()
}

/// Pull the JSON object out of a model reply.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(caps) = fence_regex().and_then(|re| re.captures(text)) {
        if let Some(m) = caps.get(1) {
            return Some(m.as_str());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse and validate a model reply.
pub fn parse_analysis(text: &str) -> Result<ParsedAnalysis, ScanError> {
    let json = extract_json(text)
        .ok_or_else(|| ScanError::model_response("no JSON object in response", text))?;

    let raw: RawAnalysis = serde_json::from_str(json)
        .map_err(|e| ScanError::model_response(format!("invalid analysis JSON: {e}"), text))?;

    if raw.scores.len() < MIN_SCORES || raw.scores.len() > MAX_SCORES {
        return Err(ScanError::model_response(
            format!(
                "expected {MIN_SCORES}-{MAX_SCORES} scores, got {}",
                raw.scores.len()
            ),
            text,
        ));
    }
    if let Some((name, value)) = raw
        .scores
        .iter()
        .find(|(_, v)| !v.is_finite() || **v < 0.0 || **v > 100.0)
    {
        return Err(ScanError::model_response(
            format!("score {name} out of range: {value}"),
            text,
        ));
    }
    if raw.summary.trim().is_empty() {
        return Err(ScanError::model_response("empty summary", text));
    }

    let overall_score = raw.scores.values().sum::<f64>() / raw.scores.len() as f64;

    Ok(ParsedAnalysis {
        scores: raw.scores,
        overall_score,
        recommendation: raw.recommendation,
        summary: raw.summary.trim().to_string(),
        strengths: raw.strengths,
        risks: raw.risks,
        questions: raw.questions,
        growth_prediction: non_empty(raw.growth_prediction),
        investment_thesis: non_empty(raw.investment_thesis),
        competitive_analysis: non_empty(raw.competitive_analysis),
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
