use crate::dates;
use crate::report::Backend;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use time::Date;

pub const DEFAULT_BODY_NAME: &str = "City Council";

/// One physical council meeting, merged from every feed sub-entry sharing its date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MeetingRecord {
    pub name: String,
    #[serde(with = "dates::iso_date")]
    #[schemars(with = "String")]
    pub canonical_date: Date,
    pub display_date: String, // MM/DD/YYYY
    pub detail_url: Option<String>,
    pub agenda_url: Option<String>,
    pub minutes_url: Option<String>,
    pub webcast_url: Option<String>,
    pub has_webcast: bool,
}

impl MeetingRecord {
    pub fn new(canonical_date: Date) -> Self {
        Self {
            name: DEFAULT_BODY_NAME.to_string(),
            canonical_date,
            display_date: dates::to_display(canonical_date),
            detail_url: None,
            agenda_url: None,
            minutes_url: None,
            webcast_url: None,
            has_webcast: false,
        }
    }

    pub fn iso_date(&self) -> String {
        dates::to_iso(self.canonical_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptSegment {
    pub text: String,
    pub start_offset: f64, // seconds
    pub duration: f64,     // seconds
}

impl TranscriptSegment {
    pub fn new(text: impl Into<String>, start_offset: f64, duration: f64) -> Self {
        Self {
            text: text.into(),
            start_offset,
            duration,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Transcript of one accepted video. Built through [`TranscriptResult::accept`], which
/// enforces the caller's minimum segment count. Deserialized values go through the same
/// filter with a minimum of one, so no value holds blank segments or none at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "UncheckedTranscript")]
pub struct TranscriptResult {
    video_id: String,
    segments: Vec<TranscriptSegment>,
}

#[derive(Deserialize, JsonSchema)]
struct UncheckedTranscript {
    video_id: String,
    segments: Vec<TranscriptSegment>,
}

impl TryFrom<UncheckedTranscript> for TranscriptResult {
    type Error = String;

    fn try_from(raw: UncheckedTranscript) -> Result<Self, Self::Error> {
        TranscriptResult::accept(raw.video_id, raw.segments, 1)
            .map_err(|_| "transcript has no non-blank segments".to_string())
    }
}

impl TranscriptResult {
    /// Drops blank segments and accepts the rest only if `min_segments` remain.
    pub fn accept(
        video_id: impl Into<String>,
        segments: Vec<TranscriptSegment>,
        min_segments: usize,
    ) -> Result<Self, usize> {
        let segments: Vec<TranscriptSegment> =
            segments.into_iter().filter(|s| !s.is_blank()).collect();
        if segments.len() < min_segments {
            return Err(segments.len());
        }
        Ok(Self {
            video_id: video_id.into(),
            segments,
        })
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment texts joined with single spaces.
    pub fn text_blob(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Classification of an LLM backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Auth,
    RateLimited,
    QuotaExceeded,
    ModelUnavailable,
    Generic,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Auth => "auth",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::QuotaExceeded => "quota_exceeded",
            FailureKind::ModelUnavailable => "model_unavailable",
            FailureKind::Generic => "generic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auth" => Some(FailureKind::Auth),
            "rate_limited" => Some(FailureKind::RateLimited),
            "quota_exceeded" => Some(FailureKind::QuotaExceeded),
            "model_unavailable" => Some(FailureKind::ModelUnavailable),
            "generic" => Some(FailureKind::Generic),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportOutcome {
    Generated,
    Failed { kind: FailureKind },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Report {
    #[serde(with = "dates::iso_date")]
    #[schemars(with = "String")]
    pub meeting_date: Date,
    pub title: String,
    pub body: String,
    pub backend_used: Backend,
    pub outcome: ReportOutcome,
    pub agenda_url: Option<String>,
    pub minutes_url: Option<String>,
    pub webcast_url: Option<String>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ReportOutcome::Generated)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.outcome {
            ReportOutcome::Generated => None,
            ReportOutcome::Failed { kind } => Some(kind),
        }
    }
}
