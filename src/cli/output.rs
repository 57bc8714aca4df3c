use accessly_core_types::AnalysisResult;
use anyhow::Result;
use clap::ValueEnum;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

pub fn render(result: &AnalysisResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        OutputFormat::Human => Ok(render_human(result)),
    }
}

fn render_human(result: &AnalysisResult) -> String {
    let mut out = format!(
        "Score: {}/100\nIssues: {}\n",
        result.score,
        result.issues.len()
    );
    for issue in &result.issues {
        let impact = issue.impact.map(|impact| impact.as_str()).unwrap_or("unknown");
        out.push_str(&format!(
            "\n[{impact}] {}\n  {}\n",
            issue.id, issue.description
        ));
        if let Some(suggestion) = result.suggestions.get(&issue.id) {
            out.push_str(&format!("  Fix: {suggestion}\n"));
        }
    }
    if result.screenshot.is_some() {
        out.push_str("\nScreenshot captured.\n");
    }
    out
}
