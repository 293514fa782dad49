//! Resolves a meeting date to a transcript. Video search is ranked by
//! similarity, not indexed by date, so the first few results are treated as
//! hypotheses and transcript length decides between them: shorts and unrelated
//! clips have short or empty captions.

use crate::config::{Settings, VideoSettings};
use crate::dates;
use crate::error::{CaptionError, ConfigError};
use crate::schema::{TranscriptResult, TranscriptSegment};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::ACCEPT_LANGUAGE;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;
use tracing::{info, warn};

static WATCH_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"watch\?v=([a-zA-Z0-9_-]{11})").expect("watch id pattern is valid")
});

/// Searchable video index returning candidate video ids, best match first.
pub trait VideoIndex {
    fn search(&self, query: &str) -> Result<Vec<String>, CaptionError>;
}

/// Caption segments for one video.
pub trait CaptionSource {
    fn fetch_segments(&self, video_id: &str) -> Result<Vec<TranscriptSegment>, CaptionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    pub institution: String,
    pub candidate_cap: usize,
    pub min_segments: usize,
}

impl ResolverConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            institution: settings.institution_name(),
            candidate_cap: settings.video.candidate_cap.max(1),
            min_segments: settings.video.min_segments,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Why one candidate was passed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    TooShort { segments: usize },
    Unavailable(CaptionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCandidate {
    pub video_id: String,
    pub reason: Rejection,
}

/// Every candidate was exhausted without an acceptable transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptNotFound {
    pub meeting_date: String,
    pub queries: Vec<String>,
    pub rejected: Vec<RejectedCandidate>,
}

impl TranscriptNotFound {
    /// True when nothing matched the search at all.
    pub fn no_candidates(&self) -> bool {
        self.rejected.is_empty()
    }

    /// True when at least one candidate existed but exposed no captions.
    pub fn captions_unavailable(&self) -> bool {
        self.rejected.iter().any(|r| {
            matches!(
                r.reason,
                Rejection::Unavailable(CaptionError::CaptionsDisabled)
            )
        })
    }

    pub fn user_message(&self) -> String {
        let base = format!("No transcript found for {}.", self.meeting_date);
        if self.no_candidates() {
            format!("{base} No matching video was found; the meeting video may not be uploaded yet.")
        } else if self.captions_unavailable() {
            format!(
                "{base} Candidate videos were found but captions are disabled or not yet generated; \
                 try again once auto-captions are available."
            )
        } else {
            format!(
                "{base} {} candidate video(s) were checked but none carried a full-length transcript; \
                 the video may not be uploaded yet.",
                self.rejected.len()
            )
        }
    }
}

impl fmt::Display for TranscriptNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for TranscriptNotFound {}

pub struct TranscriptResolver<I, C> {
    index: I,
    captions: C,
    config: ResolverConfig,
}

impl TranscriptResolver<YouTubeSearch, YouTubeCaptions> {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self::new(
            YouTubeSearch::new(&settings.video)?,
            YouTubeCaptions::new(&settings.video)?,
            ResolverConfig::from_settings(settings),
        ))
    }
}

impl<I: VideoIndex, C: CaptionSource> TranscriptResolver<I, C> {
    pub fn new(index: I, captions: C, config: ResolverConfig) -> Self {
        Self {
            index,
            captions,
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Search phrasings for one meeting date; at least two variants.
    pub fn queries_for(&self, meeting_date: &str) -> Vec<String> {
        let phrase = dates::search_phrase_lossy(meeting_date);
        let institution = &self.config.institution;
        let mut queries = vec![
            format!("{institution} Meeting {phrase}"),
            format!("{institution} {phrase}"),
        ];
        if let Some(date) = dates::parse_flexible(meeting_date) {
            queries.push(format!("{institution} Meeting {}", dates::to_display(date)));
        }
        queries
    }

    /// Candidate ids across every query, first-seen order, capped.
    pub fn collect_candidates(&self, queries: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        'queries: for query in queries {
            if candidates.len() >= self.config.candidate_cap {
                break;
            }
            let ids = match self.index.search(query) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(target: "civic_core::transcript", query = %query, kind = e.kind(), error = %e, "video search failed");
                    continue;
                }
            };
            for id in ids {
                if candidates.len() >= self.config.candidate_cap {
                    break 'queries;
                }
                if seen.insert(id.clone()) {
                    candidates.push(id);
                }
            }
        }
        candidates
    }

    pub fn resolve_transcript(
        &self,
        meeting_date: &str,
    ) -> Result<TranscriptResult, TranscriptNotFound> {
        let queries = self.queries_for(meeting_date);
        let candidates = self.collect_candidates(&queries);
        info!(
            target: "civic_core::transcript",
            meeting_date,
            candidates = candidates.len(),
            "video candidates collected"
        );

        let mut rejected = Vec::new();
        for video_id in candidates {
            let segments = match self.captions.fetch_segments(&video_id) {
                Ok(segments) => segments,
                Err(e) => {
                    warn!(
                        target: "civic_core::transcript",
                        video_id = %video_id,
                        kind = e.kind(),
                        error = %e,
                        "transcript fetch failed, trying next candidate"
                    );
                    rejected.push(RejectedCandidate {
                        video_id,
                        reason: Rejection::Unavailable(e),
                    });
                    continue;
                }
            };

            match TranscriptResult::accept(video_id.as_str(), segments, self.config.min_segments) {
                Ok(result) => {
                    info!(
                        target: "civic_core::transcript",
                        video_id = %video_id,
                        segments = result.len(),
                        "transcript accepted"
                    );
                    return Ok(result);
                }
                Err(count) => {
                    info!(
                        target: "civic_core::transcript",
                        video_id = %video_id,
                        segments = count,
                        min_segments = self.config.min_segments,
                        "transcript too short, probable wrong video"
                    );
                    rejected.push(RejectedCandidate {
                        video_id,
                        reason: Rejection::TooShort { segments: count },
                    });
                }
            }
        }

        warn!(
            target: "civic_core::transcript",
            meeting_date,
            rejected = rejected.len(),
            "no acceptable transcript"
        );
        Err(TranscriptNotFound {
            meeting_date: meeting_date.to_string(),
            queries,
            rejected,
        })
    }
}

fn video_client(settings: &VideoSettings) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(settings.timeout())
        .user_agent(settings.user_agent.as_str())
        .build()
        .map_err(|e| ConfigError::Client(e.to_string()))
}

fn get_text(client: &Client, url: &str) -> Result<String, CaptionError> {
    let response = client
        .get(url)
        .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
        .send()
        .map_err(|e| CaptionError::Network(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(CaptionError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    response
        .text()
        .map_err(|e| CaptionError::Network(e.to_string()))
}

/// Scrapes the YouTube results page for `watch?v=` ids.
pub struct YouTubeSearch {
    client: Client,
    search_url: String,
}

impl YouTubeSearch {
    pub fn new(settings: &VideoSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            client: video_client(settings)?,
            search_url: settings.search_url.clone(),
        })
    }
}

impl VideoIndex for YouTubeSearch {
    fn search(&self, query: &str) -> Result<Vec<String>, CaptionError> {
        let url = format!(
            "{}?search_query={}",
            self.search_url,
            urlencoding::encode(query)
        );
        info!(target: "civic_core::transcript", query, "searching videos");
        let page = get_text(&self.client, &url)?;
        Ok(extract_video_ids(&page))
    }
}

/// Distinct 11-character ids in page order.
pub fn extract_video_ids(page: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    WATCH_ID
        .captures_iter(page)
        .map(|caps| caps[1].to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Reads caption tracks from the watch page and downloads the timed-text track.
pub struct YouTubeCaptions {
    client: Client,
    watch_url: String,
}

impl YouTubeCaptions {
    pub fn new(settings: &VideoSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            client: video_client(settings)?,
            watch_url: settings.watch_url.clone(),
        })
    }
}

impl CaptionSource for YouTubeCaptions {
    fn fetch_segments(&self, video_id: &str) -> Result<Vec<TranscriptSegment>, CaptionError> {
        let page = get_text(&self.client, &format!("{}?v={video_id}", self.watch_url))?;
        let tracks = caption_tracks(&page)?;
        let track = pick_track(&tracks).ok_or(CaptionError::CaptionsDisabled)?;
        let timed_text = get_text(&self.client, &track.base_url)?;
        let segments = parse_timed_text(&timed_text);
        info!(
            target: "civic_core::transcript",
            video_id,
            language = %track.language_code,
            segments = segments.len(),
            "captions fetched"
        );
        Ok(segments)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionTrack {
    pub base_url: String,
    #[serde(default)]
    pub language_code: String,
    /// `"asr"` for auto-generated tracks.
    #[serde(default)]
    pub kind: Option<String>,
}

/// Caption track list embedded in a watch page's player response.
pub fn caption_tracks(page: &str) -> Result<Vec<CaptionTrack>, CaptionError> {
    const MARKER: &str = "\"captionTracks\":";
    let Some(start) = page.find(MARKER) else {
        if page.contains("\"playabilityStatus\":{\"status\":\"ERROR\"")
            || page.contains("\"status\":\"LOGIN_REQUIRED\"")
        {
            return Err(CaptionError::VideoUnavailable(
                "player reported the video as not playable".to_string(),
            ));
        }
        return Err(CaptionError::CaptionsDisabled);
    };
    let rest = &page[start + MARKER.len()..];
    serde_json::Deserializer::from_str(rest)
        .into_iter::<Vec<CaptionTrack>>()
        .next()
        .ok_or_else(|| CaptionError::Parse("no caption track list after marker".to_string()))?
        .map_err(|e| CaptionError::Parse(e.to_string()))
}

/// English manual track, then English auto-generated, then whatever comes first.
fn pick_track(tracks: &[CaptionTrack]) -> Option<&CaptionTrack> {
    let english = |t: &&CaptionTrack| t.language_code.starts_with("en");
    let manual = |t: &&CaptionTrack| t.kind.as_deref() != Some("asr");
    tracks
        .iter()
        .find(|t| english(t) && manual(t))
        .or_else(|| tracks.iter().find(english))
        .or_else(|| tracks.first())
}

/// `<text start=".." dur="..">..</text>` elements of a timed-text document.
pub fn parse_timed_text(document: &str) -> Vec<TranscriptSegment> {
    let fragment = Html::parse_fragment(document);
    let Ok(text_sel) = Selector::parse("text") else {
        return Vec::new();
    };
    fragment
        .select(&text_sel)
        .map(|el| {
            let raw: String = el.text().collect();
            // Caption text is entity-escaped a second time inside the XML.
            let text: String = Html::parse_fragment(&raw).root_element().text().collect();
            let attr = |name: &str| {
                el.value()
                    .attr(name)
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(0.0)
            };
            TranscriptSegment::new(text.trim(), attr("start"), attr("dur"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeIndex {
        results: HashMap<String, Vec<String>>,
        failing: Vec<String>,
        seen_queries: RefCell<Vec<String>>,
    }

    impl FakeIndex {
        fn returning(ids: &[&str]) -> Self {
            Self {
                results: HashMap::new(),
                failing: Vec::new(),
                seen_queries: RefCell::new(Vec::new()),
            }
            .with_default(ids)
        }

        fn with_default(mut self, ids: &[&str]) -> Self {
            self.results
                .insert("*".to_string(), ids.iter().map(|s| s.to_string()).collect());
            self
        }
    }

    impl VideoIndex for FakeIndex {
        fn search(&self, query: &str) -> Result<Vec<String>, CaptionError> {
            self.seen_queries.borrow_mut().push(query.to_string());
            if self.failing.iter().any(|q| q == query) {
                return Err(CaptionError::Network("timeout".to_string()));
            }
            Ok(self
                .results
                .get(query)
                .or_else(|| self.results.get("*"))
                .cloned()
                .unwrap_or_default())
        }
    }

    struct FakeCaptions {
        by_video: HashMap<String, Result<usize, CaptionError>>,
        fetched: RefCell<Vec<String>>,
    }

    impl FakeCaptions {
        fn new(entries: &[(&str, Result<usize, CaptionError>)]) -> Self {
            Self {
                by_video: entries
                    .iter()
                    .map(|(id, r)| (id.to_string(), r.clone()))
                    .collect(),
                fetched: RefCell::new(Vec::new()),
            }
        }
    }

    impl CaptionSource for FakeCaptions {
        fn fetch_segments(&self, video_id: &str) -> Result<Vec<TranscriptSegment>, CaptionError> {
            self.fetched.borrow_mut().push(video_id.to_string());
            let count = self
                .by_video
                .get(video_id)
                .cloned()
                .unwrap_or(Err(CaptionError::CaptionsDisabled))?;
            Ok((0..count)
                .map(|i| TranscriptSegment::new(format!("segment {i}"), i as f64, 1.0))
                .collect())
        }
    }

    fn config(min_segments: usize) -> ResolverConfig {
        ResolverConfig {
            institution: "San Ramon City Council".to_string(),
            candidate_cap: 8,
            min_segments,
        }
    }

    #[test]
    fn skips_short_transcripts_until_one_passes_threshold() {
        let index = FakeIndex::returning(&["aaaaaaaaaaa", "bbbbbbbbbbb", "ccccccccccc", "ddddddddddd"]);
        let captions = FakeCaptions::new(&[
            ("aaaaaaaaaaa", Ok(5)),
            ("bbbbbbbbbbb", Ok(15)),
            ("ccccccccccc", Ok(19)),
            ("ddddddddddd", Ok(42)),
        ]);
        let resolver = TranscriptResolver::new(index, captions, config(20));
        let result = resolver.resolve_transcript("2025-01-14").unwrap();
        assert_eq!(result.video_id(), "ddddddddddd");
        assert_eq!(result.len(), 42);
        assert_eq!(resolver.captions.fetched.borrow().len(), 4);
    }

    #[test]
    fn exhaustion_returns_not_found_never_a_short_result() {
        let index = FakeIndex::returning(&["aaaaaaaaaaa", "bbbbbbbbbbb"]);
        let captions = FakeCaptions::new(&[("aaaaaaaaaaa", Ok(3)), ("bbbbbbbbbbb", Ok(19))]);
        let resolver = TranscriptResolver::new(index, captions, config(20));
        let missing = resolver.resolve_transcript("01/14/2025").unwrap_err();
        assert_eq!(missing.rejected.len(), 2);
        assert_eq!(
            missing.rejected[1].reason,
            Rejection::TooShort { segments: 19 }
        );
        assert!(!missing.no_candidates());
        assert!(missing.user_message().contains("01/14/2025"));
    }

    #[test]
    fn candidate_failures_are_not_fatal() {
        let index = FakeIndex::returning(&["aaaaaaaaaaa", "bbbbbbbbbbb", "ccccccccccc"]);
        let captions = FakeCaptions::new(&[
            ("aaaaaaaaaaa", Err(CaptionError::Network("reset".to_string()))),
            ("bbbbbbbbbbb", Err(CaptionError::CaptionsDisabled)),
            ("ccccccccccc", Ok(25)),
        ]);
        let resolver = TranscriptResolver::new(index, captions, config(20));
        assert_eq!(resolver.resolve_transcript("2025-01-14").unwrap().video_id(), "ccccccccccc");
    }

    #[test]
    fn queries_use_natural_language_date_and_institution() {
        let resolver = TranscriptResolver::new(FakeIndex::returning(&[]), FakeCaptions::new(&[]), config(20));
        let queries = resolver.queries_for("2025-01-14");
        assert!(queries.len() >= 2);
        assert_eq!(queries[0], "San Ramon City Council Meeting January 14 2025");
        assert_eq!(queries[1], "San Ramon City Council January 14 2025");
        assert!(queries.iter().all(|q| q.contains("San Ramon City Council")));
    }

    #[test]
    fn candidates_are_deduplicated_across_queries_and_capped() {
        let mut index = FakeIndex::returning(&[]);
        index.results.insert(
            "q1".to_string(),
            vec!["a".into(), "b".into(), "c".into()],
        );
        index.results.insert(
            "q2".to_string(),
            vec!["b".into(), "d".into(), "e".into(), "f".into()],
        );
        index.failing.push("q3".to_string());
        let mut cfg = config(20);
        cfg.candidate_cap = 5;
        let resolver = TranscriptResolver::new(index, FakeCaptions::new(&[]), cfg);
        let got = resolver.collect_candidates(&["q3".to_string(), "q1".to_string(), "q2".to_string()]);
        assert_eq!(got, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn no_candidates_message_points_at_upload_delay() {
        let resolver = TranscriptResolver::new(FakeIndex::returning(&[]), FakeCaptions::new(&[]), config(20));
        let missing = resolver.resolve_transcript("2025-01-14").unwrap_err();
        assert!(missing.no_candidates());
        assert!(missing.user_message().contains("not be uploaded yet"));
        assert!(resolver.index.seen_queries.borrow().len() >= 2);
    }

    #[test]
    fn captions_disabled_message_is_distinct() {
        let index = FakeIndex::returning(&["aaaaaaaaaaa"]);
        let captions = FakeCaptions::new(&[("aaaaaaaaaaa", Err(CaptionError::CaptionsDisabled))]);
        let resolver = TranscriptResolver::new(index, captions, config(20));
        let missing = resolver.resolve_transcript("2025-01-14").unwrap_err();
        assert!(missing.captions_unavailable());
        assert!(missing.user_message().contains("captions are disabled"));
    }

    #[test]
    fn extracts_unique_video_ids_from_results_page() {
        let page = r#"<a href="/watch?v=dQw4w9WgXcQ">x</a>"url":"/watch?v=abcdefghij_"
            <a href="/watch?v=dQw4w9WgXcQ&t=5">dup</a> watch?v=short"#;
        assert_eq!(extract_video_ids(page), vec!["dQw4w9WgXcQ", "abcdefghij_"]);
    }

    #[test]
    fn reads_caption_tracks_from_player_response() {
        let page = r#"var ytInitialPlayerResponse = {"captions":{"playerCaptionsTracklistRenderer":{"captionTracks":[{"baseUrl":"https://www.youtube.com/api/timedtext?v=x&lang=es","languageCode":"es"},{"baseUrl":"https://www.youtube.com/api/timedtext?v=x&lang=en&kind=asr","languageCode":"en","kind":"asr"}],"audioTracks":[]}}};"#;
        let tracks = caption_tracks(page).unwrap();
        assert_eq!(tracks.len(), 2);
        let picked = pick_track(&tracks).unwrap();
        assert_eq!(picked.language_code, "en");
        assert_eq!(picked.base_url, "https://www.youtube.com/api/timedtext?v=x&lang=en&kind=asr");
    }

    #[test]
    fn missing_caption_tracks_is_captions_disabled() {
        assert_eq!(
            caption_tracks(r#"{"playabilityStatus":{"status":"OK"}}"#).unwrap_err(),
            CaptionError::CaptionsDisabled
        );
        assert!(matches!(
            caption_tracks(r#"{"playabilityStatus":{"status":"ERROR","reason":"Video unavailable"}}"#),
            Err(CaptionError::VideoUnavailable(_))
        ));
    }

    #[test]
    fn parses_timed_text_with_double_escaped_entities() {
        let xml = r#"<?xml version="1.0" encoding="utf-8" ?><transcript>
            <text start="0.5" dur="2.25">Good evening &amp;amp; welcome</text>
            <text start="2.75" dur="1.5">it&amp;#39;s seven o&amp;#39;clock</text>
            <text start="4.25" dur="0.5"></text>
        </transcript>"#;
        let segments = parse_timed_text(xml);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].text, "Good evening & welcome");
        assert_eq!(segments[0].start_offset, 0.5);
        assert_eq!(segments[0].duration, 2.25);
        assert_eq!(segments[1].text, "it's seven o'clock");
        assert!(segments[2].is_blank());
    }
}
