//! Text-generation tasks delegated to the conversation engine at settlement.

use parley_types::{ConversationEngine, ExtractionVariable, PortError};

const SUMMARY_PROMPT: &str = "Summarize this phone call in two or three sentences. State \
who called, what they wanted, and the outcome. Return only the summary.";

const REDACTION_PROMPT: &str = "Remove all personally identifiable information from this \
call transcript. Replace names, phone numbers, email addresses, street addresses, dates of \
birth, account or card numbers and any other identifying details with [REDACTED]. Keep \
every line, its order, and its \"Agent:\" or \"Caller:\" label exactly as they are. Return \
only the redacted transcript.";

const TOPICS_PROMPT: &str = "List the main topics of this call summary as a JSON array of \
short lowercase strings, at most five. Return only the JSON array.";

const MERGE_PROMPT: &str = "Merge these two summaries of conversations with the same person \
into one concise summary of at most four sentences. Keep facts that are still relevant and \
prefer the newer summary where they conflict. Return only the merged summary.";

/// Removes a surrounding Markdown code fence, if any.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

async fn generate(engine: &dyn ConversationEngine, prompt: String) -> Result<String, PortError> {
    let text = engine.generate_text(&prompt).await?;
    let text = text.trim();
    if text.is_empty() {
        return Err(PortError::Invalid("empty generation".to_string()));
    }
    Ok(text.to_string())
}

pub async fn summarize(engine: &dyn ConversationEngine, transcript: &str) -> Result<String, PortError> {
    generate(engine, format!("{SUMMARY_PROMPT}\n\nTranscript:\n{transcript}")).await
}

/// Rewrites the transcript without personal information, keeping labels.
pub async fn redact(engine: &dyn ConversationEngine, transcript: &str) -> Result<String, PortError> {
    let text = generate(engine, format!("{REDACTION_PROMPT}\n\nTranscript:\n{transcript}")).await?;
    Ok(strip_fence(&text).to_string())
}

/// Extracts the configured variables as a JSON object.
pub async fn extract(
    engine: &dyn ConversationEngine,
    variables: &[ExtractionVariable],
    transcript: &str,
) -> Result<serde_json::Value, PortError> {
    let fields = variables
        .iter()
        .map(|v| format!("- {} ({}): {}", v.name, v.kind, v.description))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "Extract the following fields from this phone call. Return a JSON object with \
         exactly these keys; use null for anything not mentioned.\n{fields}\n\n\
         Transcript:\n{transcript}"
    );
    let text = generate(engine, prompt).await?;
    let value: serde_json::Value = serde_json::from_str(strip_fence(&text))
        .map_err(|e| PortError::Invalid(format!("extraction is not JSON: {e}")))?;
    if !value.is_object() {
        return Err(PortError::Invalid("extraction is not a JSON object".to_string()));
    }
    Ok(value)
}

/// Topics of a summary. Unparseable output yields no topics.
pub async fn topics(engine: &dyn ConversationEngine, summary: &str) -> Result<Vec<String>, PortError> {
    let text = generate(engine, format!("{TOPICS_PROMPT}\n\nSummary:\n{summary}")).await?;
    Ok(parse_topics(&text))
}

pub fn parse_topics(text: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(strip_fence(text))
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

pub async fn merge_summaries(
    engine: &dyn ConversationEngine,
    previous: &str,
    latest: &str,
) -> Result<String, PortError> {
    generate(
        engine,
        format!("{MERGE_PROMPT}\n\nPrevious summary:\n{previous}\n\nNew summary:\n{latest}"),
    )
    .await
}
