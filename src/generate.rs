//! Generative fallback for searches nothing else could answer.
//!
//! One completion request turns a free-text query into a plausible
//! [`ServiceSummary`] + [`ServiceDetail`] pair. Every failure (transport,
//! empty answer, unparsable JSON, the model declining) yields `None`.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::llm::LlmClient;
use crate::model::{LocalizedString, ServiceDetail, ServiceSummary, now_millis};
use crate::search::word_separator;

/// Category assigned to generated services.
pub const GENERATED_CATEGORY: &str = "ai";

/// Prefix of every generated service id.
pub const GENERATED_ID_PREFIX: &str = "ai_";

const GENERATED_ICON: &str = "ic_ai_generated";

/// System prompt for service generation.
const GENERATE_SYSTEM_PROMPT: &str = r#"You help citizens of Bangladesh find government and public services. Given a search query, describe the single public service the citizen is most likely looking for, in English and Bengali.

Respond with ONLY a JSON object (no markdown, no explanation) matching this structure:
{
  "title": {"en": "Service name", "bn": "সেবার নাম"},
  "subtitle": {"en": "One-line summary", "bn": "এক লাইনের সারাংশ"},
  "keywords": ["lowercase", "search", "terms"],
  "instructions": {"en": "1. First step\n2. Second step", "bn": "১. প্রথম ধাপ\n২. দ্বিতীয় ধাপ"},
  "requiredDocuments": {"en": "...", "bn": "..."},
  "processingTime": {"en": "...", "bn": "..."},
  "contactInfo": {"en": "Office, hotline or website", "bn": "..."}
}

Rules:
- Only describe services that actually exist in Bangladesh
- Instructions must be numbered, concrete steps
- If the query does not refer to any public service, respond with {"unknown": true}"#;

/// A generated catalog entry, ready to be stored locally.
#[derive(Debug, Clone)]
pub struct GeneratedService {
    pub summary: ServiceSummary,
    pub detail: ServiceDetail,
}

#[derive(Debug, Default, Deserialize)]
struct GeneratedText {
    #[serde(default)]
    en: String,
    #[serde(default)]
    bn: String,
}

impl From<GeneratedText> for LocalizedString {
    fn from(text: GeneratedText) -> Self {
        LocalizedString::new(text.en, text.bn)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedResponse {
    #[serde(default)]
    unknown: bool,
    #[serde(default)]
    title: GeneratedText,
    #[serde(default)]
    subtitle: GeneratedText,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    instructions: GeneratedText,
    #[serde(default)]
    required_documents: GeneratedText,
    #[serde(default)]
    processing_time: GeneratedText,
    #[serde(default)]
    contact_info: GeneratedText,
}

/// Ask the model for a service matching `query`.
pub async fn generate_service(llm: &dyn LlmClient, query: &str) -> Option<GeneratedService> {
    let user_msg = format!("Search query: {}", query.trim());

    match llm.complete(GENERATE_SYSTEM_PROMPT, &user_msg).await {
        Ok(completion) => match parse_generated(&completion.text, query) {
            Ok(generated) => generated,
            Err(e) => {
                warn!("Failed to parse generated service: {e}");
                None
            }
        },
        Err(e) => {
            warn!("Service generation LLM call failed: {e}");
            None
        }
    }
}

/// Parse a model response into a service for `query`.
///
/// `Ok(None)` means the model answered but declined or left the title empty.
fn parse_generated(text: &str, query: &str) -> Result<Option<GeneratedService>, String> {
    let cleaned = strip_markdown_fences(text);
    let response: GeneratedResponse =
        serde_json::from_str(&cleaned).map_err(|e| format!("JSON parse error: {e}"))?;

    if response.unknown {
        debug!("Model found no service for '{query}'");
        return Ok(None);
    }

    let title = LocalizedString::from(response.title);
    if title.en.trim().is_empty() {
        return Ok(None);
    }

    let id = generated_id(query);
    let now = now_millis();

    let mut keywords: Vec<String> = Vec::new();
    for keyword in response
        .keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .chain(std::iter::once(query.trim().to_lowercase()))
    {
        if !keyword.is_empty() && !keywords.contains(&keyword) {
            keywords.push(keyword);
        }
    }

    let summary = ServiceSummary {
        id: id.clone(),
        title,
        subtitle: response.subtitle.into(),
        icon: GENERATED_ICON.to_string(),
        category: GENERATED_CATEGORY.to_string(),
        version_added: 0,
        last_updated: now,
        images: Vec::new(),
        image_names: Vec::new(),
        search_keywords: keywords,
    };

    let detail = ServiceDetail {
        service_id: id,
        instructions: response.instructions.into(),
        required_documents: response.required_documents.into(),
        processing_time: response.processing_time.into(),
        contact_info: response.contact_info.into(),
        youtube_link: None,
        last_updated: now,
        images: Vec::new(),
        image_names: Vec::new(),
    };

    Ok(Some(GeneratedService { summary, detail }))
}

/// Stable id for a service generated from `query`.
///
/// Lowercases the query and collapses every run of separator characters into
/// a single underscore, so repeated generations for the same query overwrite
/// one row.
pub fn generated_id(query: &str) -> String {
    let lowered = query.trim().to_lowercase();
    let slug = word_separator().replace_all(&lowered, "_");
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        format!("{GENERATED_ID_PREFIX}query")
    } else {
        format!("{GENERATED_ID_PREFIX}{slug}")
    }
}

/// Strip markdown code fences from LLM output.
fn strip_markdown_fences(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let after_first_fence = trimmed
            .find('\n')
            .map(|i| &trimmed[i + 1..])
            .unwrap_or(trimmed);
        if let Some(end) = after_first_fence.rfind("```") {
            return after_first_fence[..end].trim().to_string();
        }
    }
    trimmed.to_string()
}

// ============================================================================
// Tests
// ============================================================================
