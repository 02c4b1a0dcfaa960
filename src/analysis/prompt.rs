// Prompt construction for repository analysis.

use crate::db::models::Repository;
use crate::output::truncate_chars;

/// Build the analysis prompt: repository facts, the (truncated) README, and
/// the exact JSON shape expected back.
pub fn build_prompt(repo: &Repository, readme: &str, readme_max_chars: usize) -> String {
    let readme = readme.trim();
    let readme_section = if readme.is_empty() {
        "(no README)".to_string()
    } else {
        truncate_chars(readme, readme_max_chars)
    };

    let topics = if repo.topics.is_empty() {
        "none".to_string()
    } else {
        repo.topics.join(", ")
    };
    let date = |d: Option<chrono::DateTime<chrono::Utc>>| {
        d.map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    };

    format!(
        "Evaluate this open-source AI/ML repository as a potential investment.\n\
         \n\
         Repository: {full_name}\n\
         URL: {url}\n\
         Description: {description}\n\
         Language: {language}\n\
         Topics: {topics}\n\
         Stars: {stars}\n\
         Forks: {forks}\n\
         Open issues: {issues}\n\
         Created: {created}\n\
         Last push: {pushed}\n\
         \n\
         README:\n\
         {readme_section}\n\
         \n\
         Respond with a JSON object with exactly these fields:\n\
         {{\n\
         \x20 \"scores\": {{\"innovation\": 0-100, \"market_potential\": 0-100, \
         \"technical_quality\": 0-100, \"community_traction\": 0-100, \
         \"team_execution\": 0-100}},\n\
         \x20 \"recommendation\": \"strong-buy\" | \"buy\" | \"watch\" | \"pass\",\n\
         \x20 \"summary\": \"two or three sentences\",\n\
         \x20 \"strengths\": [\"...\"],\n\
         \x20 \"risks\": [\"...\"],\n\
         \x20 \"questions\": [\"open questions for the maintainers\"],\n\
         \x20 \"growth_prediction\": \"optional\",\n\
         \x20 \"investment_thesis\": \"optional\",\n\
         \x20 \"competitive_analysis\": \"optional\"\n\
         }}",
        full_name = repo.full_name,
        url = repo.html_url,
        description = repo.description.as_deref().unwrap_or("(none)"),
        language = repo.language.as_deref().unwrap_or("unknown"),
        topics = topics,
        stars = repo.stars,
        forks = repo.forks,
        issues = repo.open_issues,
        created = date(repo.created_at),
        pushed = date(repo.pushed_at),
        readme_section = readme_section,
    )
}
