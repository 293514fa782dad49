//! Report generation: prompt building, backend dispatch, failure classification
//! and normalization of the model's Markdown into the five-section body.

use crate::config::{Credentials, Settings};
use crate::error::ConfigError;
use crate::llm::{ApiShape, CompletionRequest, CompletionTransport, HttpTransport};
use crate::schema::{FailureKind, MeetingRecord, Report, ReportOutcome, TranscriptResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Section names in the order every successful body lists them.
pub const SECTIONS: [&str; 5] = [
    "Executive Summary",
    "Key Votes & Decisions",
    "Fiscal Impact",
    "Public Commentary",
    "Next Steps & Deadlines",
];

const SECTION_GUIDANCE: [&str; 5] = [
    "2-3 sentences on the meeting's most significant outcomes.",
    "Bullet list of every formal vote. Include vote counts if mentioned.",
    "Spending, contracts, or budget commitments. Write 'None discussed' if absent.",
    "Notable themes from public comment. Who spoke and on what topics.",
    "Follow-up actions or future agenda items mentioned.",
];

pub const MISSING_SECTION: &str = "None discussed.";

const OPENROUTER_HEADERS: &[(&str, &str)] = &[
    ("HTTP-Referer", "https://github.com/civic-intel/council"),
    ("X-Title", "Council Meeting Intelligence"),
];

const CITY_CLERK_ROLE: &str = "You are an expert City Clerk. Produce executive-level civic reports in clean Markdown. Start with ## Executive Summary. No preamble.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    GroqLlama,
    Gemini,
    Trinity,
    DeepseekR1,
}

impl Backend {
    pub const ALL: [Backend; 4] = [
        Backend::GroqLlama,
        Backend::Gemini,
        Backend::Trinity,
        Backend::DeepseekR1,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Backend::GroqLlama => "groq_llama",
            Backend::Gemini => "gemini",
            Backend::Trinity => "trinity",
            Backend::DeepseekR1 => "deepseek_r1",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Backend::GroqLlama => "Llama 3.3 70B",
            Backend::Gemini => "Gemini Flash",
            Backend::Trinity => "Trinity Large",
            Backend::DeepseekR1 => "DeepSeek R1",
        }
    }

    /// Name used in failure messages.
    pub fn provider_label(&self) -> &'static str {
        match self {
            Backend::GroqLlama => "Groq",
            Backend::Gemini => "Gemini",
            Backend::Trinity | Backend::DeepseekR1 => "OpenRouter",
        }
    }

    pub fn credential_var(&self) -> &'static str {
        match self {
            Backend::GroqLlama => "GROQ_API_KEY",
            Backend::Gemini => "GEMINI_API_KEY",
            Backend::Trinity | Backend::DeepseekR1 => "OPENROUTER_API_KEY",
        }
    }

    pub fn model_override_var(&self) -> Option<&'static str> {
        match self {
            Backend::GroqLlama => Some("GROQ_MODEL"),
            Backend::Gemini => Some("GEMINI_MODEL"),
            Backend::Trinity | Backend::DeepseekR1 => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Backend::GroqLlama => "llama-3.3-70b-versatile",
            Backend::Gemini => "gemini-3-flash-preview",
            Backend::Trinity => "arcee-ai/trinity-large-preview:free",
            Backend::DeepseekR1 => "deepseek/deepseek-r1-0528:free",
        }
    }

    /// Transcript characters the backend's context window can take.
    pub fn context_budget(&self) -> usize {
        match self {
            Backend::GroqLlama => 18_000,
            Backend::Gemini => 120_000,
            Backend::Trinity => 40_000,
            Backend::DeepseekR1 => 64_000,
        }
    }

    pub fn system_role(&self) -> &'static str {
        match self {
            Backend::GroqLlama => {
                "You are a senior political analyst. Report facts only. Use clean Markdown with ## headers and bullet points."
            }
            Backend::Gemini => {
                "You are a concise civic reporter. Start immediately with ## Executive Summary. Use clean Markdown with ## section headers and bullet points. No preamble."
            }
            Backend::Trinity | Backend::DeepseekR1 => CITY_CLERK_ROLE,
        }
    }

    pub fn max_tokens(&self) -> Option<u32> {
        match self {
            Backend::GroqLlama => Some(2000),
            _ => None,
        }
    }

    pub fn api_shape(&self) -> ApiShape {
        match self {
            Backend::GroqLlama => ApiShape::OpenAiCompatible {
                base_url: "https://api.groq.com/openai/v1",
                extra_headers: &[],
            },
            Backend::Gemini => ApiShape::GeminiNative {
                base_url: "https://generativelanguage.googleapis.com/v1beta",
            },
            Backend::Trinity | Backend::DeepseekR1 => ApiShape::OpenAiCompatible {
                base_url: "https://openrouter.ai/api/v1",
                extra_headers: OPENROUTER_HEADERS,
            },
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Backend::ALL
            .into_iter()
            .find(|b| b.id() == wanted)
            .ok_or_else(|| ConfigError::UnknownBackend(s.to_string()))
    }
}

/// A classified backend failure, ready to be shown as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub kind: FailureKind,
    pub message: String,
    pub raw: String,
}

impl BackendFailure {
    pub fn classify(backend: Backend, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let kind = classify_failure(&raw);
        Self {
            kind,
            message: failure_message(kind, backend.provider_label(), &raw),
            raw,
        }
    }
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendFailure {}

const RATE_LIMIT_MARKERS: &[&str] = &["rate_limit", "rate limit", "429", "too many requests"];
const QUOTA_MARKERS: &[&str] = &["insufficient_quota", "quota", "billing"];
const MODEL_MARKERS: &[&str] = &[
    "decommissioned",
    "model_not_found",
    "model not found",
    "no endpoints found",
];
const AUTH_MARKERS: &[&str] = &[
    "invalid_api_key",
    "api key not valid",
    "authentication",
    "unauthorized",
    "http 401",
];

/// Maps raw provider error text to a failure kind. First match wins, in the
/// order rate limit, quota, model, auth.
pub fn classify_failure(raw: &str) -> FailureKind {
    let lowered = raw.to_lowercase();
    let hit = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));
    if hit(RATE_LIMIT_MARKERS) {
        FailureKind::RateLimited
    } else if hit(QUOTA_MARKERS) {
        FailureKind::QuotaExceeded
    } else if hit(MODEL_MARKERS) {
        FailureKind::ModelUnavailable
    } else if hit(AUTH_MARKERS) {
        FailureKind::Auth
    } else {
        FailureKind::Generic
    }
}

pub fn failure_message(kind: FailureKind, provider: &str, raw: &str) -> String {
    match kind {
        FailureKind::RateLimited => {
            format!("**Rate Limit:** {provider} is busy. Wait 60 s and retry.")
        }
        FailureKind::QuotaExceeded => format!("**Quota Error:** {provider} has insufficient credits."),
        FailureKind::ModelUnavailable => {
            format!("**Model Error:** {provider} model is decommissioned or unavailable.")
        }
        FailureKind::Auth => format!("**Auth Error:** Invalid {provider} API key."),
        FailureKind::Generic => format!("**{provider} Error:** {raw}"),
    }
}

/// Prefix of at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Joined transcript text cut to the backend's budget.
pub fn prepare_transcript(transcript: &TranscriptResult, backend: Backend) -> String {
    let blob = transcript.text_blob();
    let budget = backend.context_budget();
    let cut = truncate_chars(&blob, budget);
    if cut.len() < blob.len() {
        info!(
            target: "civic_core::report",
            backend = backend.id(),
            original_chars = blob.chars().count(),
            budget,
            "transcript truncated to context budget"
        );
    }
    cut.to_string()
}

pub fn build_prompt(institution: &str, meeting: &MeetingRecord, transcript_text: &str) -> String {
    let mut prompt = format!(
        "You are a senior municipal reporter covering a {institution} meeting on {}.\n",
        meeting.display_date
    );
    if let Some(agenda) = &meeting.agenda_url {
        prompt.push_str(&format!("Agenda: {agenda}\n"));
    }
    if let Some(minutes) = &meeting.minutes_url {
        prompt.push_str(&format!("Minutes: {minutes}\n"));
    }
    prompt.push_str(
        "\nProduce a structured civic intelligence report with EXACTLY these sections, in this order:\n\n",
    );
    for (name, guidance) in SECTIONS.iter().zip(SECTION_GUIDANCE) {
        prompt.push_str(&format!("## {name}\n{guidance}\n\n"));
    }
    prompt.push_str("RULES: Start immediately with ## Executive Summary. Facts only. No preamble.\n\n");
    prompt.push_str("TRANSCRIPT:\n");
    prompt.push_str(transcript_text);
    prompt
}

/// Rewrites a model answer into the five `## Name` sections, in order.
/// `None` when the answer contains none of the section headers.
pub fn normalize_report_body(raw: &str) -> Option<String> {
    let cleaned = strip_reasoning(raw);
    let mut sections: [Option<String>; 5] = Default::default();
    let mut current: Option<usize> = None;

    for line in cleaned.lines() {
        if let Some(index) = section_index(line) {
            current = Some(index);
            sections[index].get_or_insert_with(String::new);
            continue;
        }
        let Some(index) = current else { continue };
        let buffer = sections[index].get_or_insert_with(String::new);
        buffer.push_str(&demote_heading(line));
        buffer.push('\n');
    }

    if sections.iter().all(Option::is_none) {
        return None;
    }

    let rendered: Vec<String> = SECTIONS
        .iter()
        .zip(sections)
        .map(|(name, content)| {
            let content = content.unwrap_or_default();
            let content = content.trim();
            let content = if content.is_empty() { MISSING_SECTION } else { content };
            format!("## {name}\n{content}\n")
        })
        .collect();
    Some(rendered.join("\n"))
}

fn strip_reasoning(raw: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";
    let mut text = raw.to_string();
    while let Some(start) = text.find(OPEN) {
        match text[start..].find(CLOSE) {
            Some(offset) => text.replace_range(start..start + offset + CLOSE.len(), ""),
            None => {
                text.truncate(start);
                break;
            }
        }
    }
    // some providers drop the opening tag
    if let Some(end) = text.find(CLOSE) {
        text = text[end + CLOSE.len()..].to_string();
    }
    text
}

fn section_key(text: &str) -> String {
    text.to_lowercase()
        .replace('&', " and ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn section_index(line: &str) -> Option<usize> {
    let trimmed = line.trim();
    if !trimmed.starts_with('#') {
        return None;
    }
    let title = trimmed
        .trim_start_matches('#')
        .trim()
        .trim_matches('*')
        .trim();
    let title = strip_numbering(title)
        .trim_matches('*')
        .trim()
        .trim_end_matches(':')
        .trim();
    let key = section_key(title);
    SECTIONS.iter().position(|name| section_key(name) == key)
}

/// `1. Name`, `2) Name` -> `Name`.
fn strip_numbering(title: &str) -> &str {
    let rest = title.trim_start_matches(|c: char| c.is_ascii_digit());
    if rest.len() == title.len() {
        return title;
    }
    match rest.strip_prefix(['.', ')']) {
        Some(rest) => rest.trim_start(),
        None => title,
    }
}

// Level-1/2 headings inside a section would read as extra sections.
fn demote_heading(line: &str) -> String {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if (1..=2).contains(&level) && trimmed[level..].starts_with(' ') {
        format!("###{}", &trimmed[level..])
    } else {
        line.trim_end().to_string()
    }
}

/// One backend, its model and transport. Built once and reused for every report.
pub struct ReportGenerator {
    backend: Backend,
    model: String,
    institution: String,
    temperature: f32,
    transport: Box<dyn CompletionTransport>,
}

impl ReportGenerator {
    /// Fails with `MissingCredential` when the backend's key is not configured.
    pub fn new(
        backend: Backend,
        settings: &Settings,
        credentials: &Credentials,
    ) -> Result<Self, ConfigError> {
        let api_key = credentials
            .api_key(backend)
            .ok_or(ConfigError::MissingCredential {
                backend: backend.id(),
                variable: backend.credential_var(),
            })?;
        let transport = HttpTransport::new(
            backend.api_shape(),
            api_key,
            Duration::from_secs(settings.report.timeout_secs),
        )?;
        let model = credentials.model_for(backend);
        info!(target: "civic_core::report", backend = backend.id(), model = %model, "report generator ready");
        Ok(Self {
            backend,
            model,
            institution: settings.institution_name(),
            temperature: settings.report.temperature,
            transport: Box::new(transport),
        })
    }

    pub fn with_transport(
        backend: Backend,
        institution: impl Into<String>,
        transport: Box<dyn CompletionTransport>,
    ) -> Self {
        Self {
            backend,
            model: backend.default_model().to_string(),
            institution: institution.into(),
            temperature: 0.1,
            transport,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One completion with the backend's system role; failures come back classified.
    pub fn complete(&self, prompt: &str) -> Result<String, BackendFailure> {
        self.complete_with_system(prompt, self.backend.system_role())
    }

    pub fn complete_with_system(&self, prompt: &str, system: &str) -> Result<String, BackendFailure> {
        let request = CompletionRequest {
            model: &self.model,
            system,
            prompt,
            temperature: self.temperature,
            max_tokens: self.backend.max_tokens(),
        };
        self.transport.complete(&request).map_err(|e| {
            let failure = BackendFailure::classify(self.backend, e.0);
            warn!(
                target: "civic_core::report",
                backend = self.backend.id(),
                kind = %failure.kind,
                raw = %failure.raw,
                "backend call failed"
            );
            failure
        })
    }

    pub fn generate_report(&self, meeting: &MeetingRecord, transcript: &TranscriptResult) -> Report {
        let text = prepare_transcript(transcript, self.backend);
        let prompt = build_prompt(&self.institution, meeting, &text);
        info!(
            target: "civic_core::report",
            backend = self.backend.id(),
            meeting = %meeting.iso_date(),
            prompt_chars = prompt.chars().count(),
            "requesting report"
        );

        let result = self.complete(&prompt).and_then(|answer| {
            normalize_report_body(&answer).ok_or_else(|| {
                warn!(target: "civic_core::report", backend = self.backend.id(), "answer has no report sections");
                BackendFailure::classify(self.backend, "model answer contained none of the report sections")
            })
        });
        let (body, outcome) = match result {
            Ok(body) => (body, ReportOutcome::Generated),
            Err(failure) => (failure.message, ReportOutcome::Failed { kind: failure.kind }),
        };

        Report {
            meeting_date: meeting.canonical_date,
            title: format!("{} Meeting", meeting.name),
            body,
            backend_used: self.backend,
            outcome,
            agenda_url: meeting.agenda_url.clone(),
            minutes_url: meeting.minutes_url.clone(),
            webcast_url: meeting.webcast_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TransportError;
    use crate::schema::TranscriptSegment;
    use std::cell::RefCell;
    use std::rc::Rc;
    use time::macros::date;

    struct Scripted {
        answer: Result<String, String>,
        prompts: Rc<RefCell<Vec<String>>>,
    }

    impl CompletionTransport for Scripted {
        fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, TransportError> {
            self.prompts.borrow_mut().push(request.prompt.to_string());
            self.answer.clone().map_err(TransportError)
        }
    }

    fn generator(
        backend: Backend,
        answer: Result<&str, &str>,
    ) -> (ReportGenerator, Rc<RefCell<Vec<String>>>) {
        let prompts = Rc::new(RefCell::new(Vec::new()));
        let transport = Scripted {
            answer: answer.map(str::to_string).map_err(str::to_string),
            prompts: Rc::clone(&prompts),
        };
        let generator =
            ReportGenerator::with_transport(backend, "San Ramon City Council", Box::new(transport));
        (generator, prompts)
    }

    fn meeting() -> MeetingRecord {
        let mut record = MeetingRecord::new(date!(2025 - 01 - 14));
        record.agenda_url = Some("https://example.test/FileOpen.aspx?Type=14&ID=1".to_string());
        record
    }

    fn transcript(words: usize, word: &str) -> TranscriptResult {
        let segments = (0..words).map(|i| TranscriptSegment::new(word, i as f64, 1.0)).collect();
        TranscriptResult::accept("abcdefghijk", segments, 1).unwrap()
    }

    fn headers(body: &str) -> Vec<&str> {
        body.lines().filter(|l| l.starts_with("## ")).collect()
    }

    const WELL_FORMED: &str = "## Executive Summary\nCouncil adopted the budget.\n\n## Key Votes & Decisions\n- Budget: 5-0\n\n## Fiscal Impact\n$2M\n\n## Public Commentary\nResidents spoke on parks.\n\n## Next Steps & Deadlines\nReturn Feb 11.";

    #[test]
    fn backend_ids_parse_and_serialize_identically() {
        for backend in Backend::ALL {
            assert_eq!(backend.id().parse::<Backend>().unwrap(), backend);
            assert_eq!(serde_json::to_value(backend).unwrap(), backend.id());
        }
        assert_eq!("Deepseek-R1".parse::<Backend>().unwrap(), Backend::DeepseekR1);
        assert!(matches!(
            "gpt4".parse::<Backend>(),
            Err(ConfigError::UnknownBackend(_))
        ));
    }

    #[test]
    fn construction_requires_the_backend_credential() {
        let settings = Settings::default();
        let none = Credentials::from_lookup(|_| None);
        let err = ReportGenerator::new(Backend::Trinity, &settings, &none)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ConfigError::MissingCredential {
                backend: "trinity",
                variable: "OPENROUTER_API_KEY"
            }
        ));
        assert_eq!(err.to_string(), "OPENROUTER_API_KEY not set (required by backend 'trinity')");

        let with_key = Credentials::from_lookup(|key| {
            (key == "GROQ_API_KEY").then(|| "gsk-test".to_string())
        });
        let generator = ReportGenerator::new(Backend::GroqLlama, &settings, &with_key).unwrap();
        assert_eq!(generator.model(), "llama-3.3-70b-versatile");
    }

    #[test]
    fn classification_markers() {
        assert_eq!(classify_failure("HTTP 429: Too Many Requests"), FailureKind::RateLimited);
        assert_eq!(
            classify_failure("Error code: 401 - {'error': {'code': 'invalid_api_key'}}"),
            FailureKind::Auth
        );
        assert_eq!(classify_failure("insufficient_quota"), FailureKind::QuotaExceeded);
        assert_eq!(
            classify_failure("The model `llama2-70b` has been decommissioned"),
            FailureKind::ModelUnavailable
        );
        assert_eq!(classify_failure("connection reset by peer"), FailureKind::Generic);
    }

    #[test]
    fn rate_limit_wins_over_quota() {
        assert_eq!(
            classify_failure("HTTP 429: RESOURCE_EXHAUSTED quota exceeded"),
            FailureKind::RateLimited
        );
    }

    #[test]
    fn generic_failure_preserves_raw_text() {
        let failure = BackendFailure::classify(Backend::Gemini, "socket closed unexpectedly");
        assert_eq!(failure.kind, FailureKind::Generic);
        assert!(failure.message.contains("socket closed unexpectedly"));
        assert_eq!(failure.raw, "socket closed unexpectedly");
    }

    #[test]
    fn truncation_is_a_character_prefix() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("exact", 5), "exact");
    }

    #[test]
    fn long_transcript_is_cut_to_the_budget_inside_the_prompt() {
        let (generator, prompts) = generator(Backend::GroqLlama, Ok(WELL_FORMED));
        // 5000 "word" segments join to 24_999 chars, over the 18_000 budget
        let long = transcript(5000, "word");
        generator.generate_report(&meeting(), &long);

        let prompt = prompts.borrow()[0].clone();
        let embedded = prompt.split("TRANSCRIPT:\n").nth(1).unwrap();
        assert_eq!(embedded.chars().count(), 18_000);
        assert!(long.text_blob().starts_with(embedded));
    }

    #[test]
    fn short_transcript_is_embedded_in_full() {
        let (generator, prompts) = generator(Backend::GroqLlama, Ok(WELL_FORMED));
        let short = transcript(30, "motion");
        generator.generate_report(&meeting(), &short);
        let prompt = prompts.borrow()[0].clone();
        assert!(prompt.ends_with(&short.text_blob()));
    }

    #[test]
    fn prompt_mentions_institution_date_and_present_links_only() {
        let prompt = build_prompt("San Ramon City Council", &meeting(), "text");
        assert!(prompt.contains("San Ramon City Council meeting on 01/14/2025"));
        assert!(prompt.contains("Agenda: https://example.test/FileOpen.aspx?Type=14&ID=1"));
        assert!(!prompt.contains("Minutes:"));
        let positions: Vec<usize> = SECTIONS
            .iter()
            .map(|s| prompt.find(&format!("## {s}")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn successful_report_has_the_five_headers_in_order() {
        let (generator, _) = generator(Backend::Gemini, Ok(WELL_FORMED));
        let report = generator.generate_report(&meeting(), &transcript(25, "vote"));
        assert!(report.is_success());
        assert!(report.body.starts_with("## Executive Summary"));
        let expected: Vec<String> = SECTIONS.iter().map(|s| format!("## {s}")).collect();
        assert_eq!(headers(&report.body), expected);
        assert_eq!(report.title, "City Council Meeting");
        assert_eq!(report.backend_used, Backend::Gemini);
        assert_eq!(report.agenda_url, meeting().agenda_url);
        assert_eq!(report.webcast_url, None);
    }

    #[test]
    fn sloppy_answer_is_normalized() {
        let answer = "<think>let me plan the report</think>Sure! Here is the report.\n\
            # EXECUTIVE SUMMARY:\nBudget adopted.\n\
            ### **Key Votes and Decisions**\n- 4-1 on parking\n## Notes\nextra\n\
            ## Executive Summary\nAlso approved minutes.";
        let body = normalize_report_body(answer).unwrap();
        let expected: Vec<String> = SECTIONS.iter().map(|s| format!("## {s}")).collect();
        assert_eq!(headers(&body), expected);
        assert!(!body.contains("Sure!"));
        assert!(!body.contains("let me plan"));
        assert!(body.contains("Budget adopted.\nAlso approved minutes."));
        assert!(body.contains("### Notes"));
        assert!(body.contains("## Fiscal Impact\nNone discussed."));
    }

    #[test]
    fn numbered_headers_are_recognised() {
        let answer = "## 1. Executive Summary\nBudget adopted.\n## 2. Key Votes & Decisions\n- 5-0\n\
            ## 3) Fiscal Impact:\n$5M contract\n## **4. Public Commentary**\nParks.\n\
            ## 5. Next Steps & Deadlines\nFeb 11.";
        let body = normalize_report_body(answer).unwrap();
        let expected: Vec<String> = SECTIONS.iter().map(|s| format!("## {s}")).collect();
        assert_eq!(headers(&body), expected);
        assert!(body.contains("## Fiscal Impact\n$5M contract"));
        assert!(body.contains("## Public Commentary\nParks."));
    }

    #[test]
    fn numbered_header_after_plain_one_is_not_misfiled() {
        let body =
            normalize_report_body("## Executive Summary\nA\n## 2. Fiscal Impact\n$5M contract").unwrap();
        assert!(body.starts_with("## Executive Summary\nA\n\n## Key Votes"));
        assert!(body.contains("## Fiscal Impact\n$5M contract"));
        assert!(!body.contains("### 2. Fiscal Impact"));
    }

    #[test]
    fn numbers_alone_do_not_make_a_section() {
        assert_eq!(section_index("## 2024 Budget Review"), None);
        assert_eq!(section_index("## 3 Fiscal Impact"), None);
        assert_eq!(section_index("### 10. Next Steps and Deadlines"), Some(4));
    }

    #[test]
    fn answer_without_sections_is_a_generic_failure() {
        let (generator, _) = generator(Backend::Trinity, Ok("I cannot help with that."));
        let report = generator.generate_report(&meeting(), &transcript(25, "vote"));
        assert_eq!(report.failure_kind(), Some(FailureKind::Generic));
        assert!(report.body.starts_with("**OpenRouter Error:**"));
    }

    #[test]
    fn transport_failure_becomes_a_classified_report() {
        let (generator, _) = generator(Backend::GroqLlama, Err("HTTP 429: rate_limit_exceeded"));
        let report = generator.generate_report(&meeting(), &transcript(25, "vote"));
        assert!(!report.is_success());
        assert_eq!(report.failure_kind(), Some(FailureKind::RateLimited));
        assert_eq!(report.body, "**Rate Limit:** Groq is busy. Wait 60 s and retry.");
    }
}
