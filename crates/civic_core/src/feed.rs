//! IQM2 calendar feed: fetch, split into heading/link entries, merge the
//! agenda, minutes and webcast sub-entries of each meeting by date.
//!
//! The feed only lists meetings whose agenda has been filed, so every record
//! produced here has at least some document trail.

use crate::config::FeedSettings;
use crate::dates;
use crate::error::{ConfigError, FeedError, InvalidRange};
use crate::schema::{DEFAULT_BODY_NAME, MeetingRecord};
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashSet};
use std::thread;
use std::time::Duration;
use time::{Date, OffsetDateTime};
use tracing::{debug, error, info, warn};

const FEED_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

const DETAIL_PATTERN: &str = "detail_meeting";
const FILE_PATTERN: &str = "fileopen";
const AGENDA_DOC_TYPE: &str = "14";
const MINUTES_DOC_TYPE: &str = "16";

/// Inclusive calendar range, `start <= end` by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: Date,
    end: Date,
}

impl DateRange {
    pub fn new(start: Date, end: Date) -> Result<Self, InvalidRange> {
        if start > end {
            return Err(InvalidRange::new(format!(
                "start {} is after end {}",
                dates::to_iso(start),
                dates::to_iso(end)
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, InvalidRange> {
        let start_date = dates::parse_flexible(start)
            .ok_or_else(|| InvalidRange::new(format!("unparsable start date '{start}'")))?;
        let end_date = dates::parse_flexible(end)
            .ok_or_else(|| InvalidRange::new(format!("unparsable end date '{end}'")))?;
        Self::new(start_date, end_date)
    }

    /// The `days` days up to and including `today`.
    pub fn trailing_days(today: Date, days: i64) -> Self {
        let start = today
            .checked_sub(time::Duration::days(days.max(0)))
            .unwrap_or(Date::MIN);
        Self { start, end: today }
    }

    pub fn start(&self) -> Date {
        self.start
    }

    pub fn end(&self) -> Date {
        self.end
    }

    pub fn contains(&self, date: Date) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Where the raw calendar document comes from.
pub trait FeedSource {
    fn fetch_document(&self) -> Result<String, FeedError>;
}

/// Fetches the calendar over HTTP with a fixed number of attempts and a fixed backoff.
pub struct HttpFeedSource {
    client: Client,
    url: String,
    max_attempts: u32,
    backoff: Duration,
}

impl HttpFeedSource {
    pub fn new(settings: &FeedSettings) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: settings.url.clone(),
            max_attempts: settings.max_attempts.max(1),
            backoff: settings.retry_backoff(),
        })
    }

    fn fetch_once(&self) -> Result<String, String> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, FEED_ACCEPT)
            .send()
            .map_err(|e| e.to_string())?;
        let response = response.error_for_status().map_err(|e| e.to_string())?;
        response.text().map_err(|e| e.to_string())
    }
}

impl FeedSource for HttpFeedSource {
    fn fetch_document(&self) -> Result<String, FeedError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.fetch_once() {
                Ok(body) => {
                    info!(target: "civic_core::feed", attempt, chars = body.len(), "calendar feed fetched");
                    return Ok(body);
                }
                Err(e) => {
                    warn!(
                        target: "civic_core::feed",
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "calendar feed attempt failed"
                    );
                    last_error = e;
                    if attempt < self.max_attempts {
                        thread::sleep(self.backoff);
                    }
                }
            }
        }
        error!(
            target: "civic_core::feed",
            attempts = self.max_attempts,
            error = %last_error,
            "calendar feed unavailable"
        );
        Err(FeedError::Unavailable {
            attempts: self.max_attempts,
            reason: last_error,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Only headings naming this body are kept.
    pub body_name: String,
    /// Relative hrefs are resolved against this.
    pub link_base: String,
}

impl ParseOptions {
    pub fn from_settings(settings: &crate::Settings) -> Self {
        Self {
            body_name: settings.institution.body.clone(),
            link_base: settings.feed.link_base.clone(),
        }
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            body_name: DEFAULT_BODY_NAME.to_string(),
            link_base: FeedSettings::default().link_base,
        }
    }
}

/// Calendar feed bound to a document source.
pub struct CalendarFeed<S> {
    source: S,
    options: ParseOptions,
    lookback_days: i64,
}

impl CalendarFeed<HttpFeedSource> {
    pub fn from_settings(settings: &crate::Settings) -> Result<Self, ConfigError> {
        let source = HttpFeedSource::new(&settings.feed)?;
        Ok(Self::new(source, ParseOptions::from_settings(settings))
            .with_lookback_days(settings.feed.lookback_days))
    }
}

impl<S: FeedSource> CalendarFeed<S> {
    pub fn new(source: S, options: ParseOptions) -> Self {
        Self {
            source,
            options,
            lookback_days: FeedSettings::default().lookback_days,
        }
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback_days = days;
        self
    }

    /// Meetings in `range`, newest first. An unreachable feed yields an empty list
    /// (logged); use [`Self::fetch_meetings_checked`] to tell the two apart.
    pub fn fetch_meetings(&self, range: DateRange) -> Result<Vec<MeetingRecord>, InvalidRange> {
        match self.fetch_meetings_checked(range) {
            Ok(meetings) => Ok(meetings),
            Err(FeedError::InvalidRange(e)) => Err(e),
            Err(FeedError::Unavailable { .. }) => Ok(Vec::new()),
        }
    }

    pub fn fetch_meetings_checked(
        &self,
        range: DateRange,
    ) -> Result<Vec<MeetingRecord>, FeedError> {
        let document = self.source.fetch_document()?;
        let meetings: Vec<MeetingRecord> = parse_feed(&document, &self.options)
            .into_iter()
            .filter(|m| range.contains(m.canonical_date))
            .collect();
        info!(
            target: "civic_core::feed",
            count = meetings.len(),
            start = %dates::to_iso(range.start()),
            end = %dates::to_iso(range.end()),
            "meetings in range"
        );
        Ok(meetings)
    }

    /// Most recent meeting within the lookback window ending today (UTC).
    pub fn fetch_latest_meeting(&self) -> Option<MeetingRecord> {
        self.fetch_latest_meeting_as_of(OffsetDateTime::now_utc().date())
    }

    pub fn fetch_latest_meeting_as_of(&self, today: Date) -> Option<MeetingRecord> {
        let range = DateRange::trailing_days(today, self.lookback_days);
        let latest = self.fetch_meetings(range).ok()?.into_iter().next();
        match &latest {
            Some(m) => info!(target: "civic_core::feed", date = %m.iso_date(), "latest meeting"),
            None => warn!(
                target: "civic_core::feed",
                days = self.lookback_days,
                "no meetings found in lookback window"
            ),
        }
        latest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Agenda,
    Minutes,
    Webcast,
    Other,
}

impl EntryKind {
    fn from_heading(heading: &str) -> Self {
        let lowered = heading.to_lowercase();
        if lowered.contains("- agenda -") {
            EntryKind::Agenda
        } else if lowered.contains("- minutes -") {
            EntryKind::Minutes
        } else if lowered.contains("- webcast -") {
            EntryKind::Webcast
        } else {
            EntryKind::Other
        }
    }
}

#[derive(Debug)]
struct Link {
    text: String,
    href: String,
}

impl Link {
    fn is_detail(&self) -> bool {
        self.href.to_lowercase().contains(DETAIL_PATTERN)
    }

    fn is_file(&self) -> bool {
        self.href.to_lowercase().contains(FILE_PATTERN)
    }

    fn has_doc_type(&self, code: &str) -> bool {
        query_value(&self.href, "type").is_some_and(|v| v == code)
    }
}

/// URL slot where a preferred link (rank 0) beats a fallback (rank 1)
/// whichever sub-entry supplies it first.
#[derive(Debug, Default)]
struct Slot {
    url: Option<String>,
    rank: u8,
}

impl Slot {
    fn offer(&mut self, url: &str, rank: u8) {
        if self.url.is_none() || rank < self.rank {
            self.url = Some(url.to_string());
            self.rank = rank;
        }
    }
}

#[derive(Debug, Default)]
struct MeetingDraft {
    detail: Slot,
    agenda: Slot,
    minutes: Slot,
    webcast: Slot,
    has_webcast: bool,
}

impl MeetingDraft {
    fn absorb(&mut self, kind: EntryKind, links: &[Link]) {
        match kind {
            EntryKind::Agenda => {
                for link in links {
                    if link.is_detail() {
                        self.detail.offer(&link.href, 0);
                    }
                    if link.is_file() {
                        let rank = if link.has_doc_type(AGENDA_DOC_TYPE) { 0 } else { 1 };
                        self.agenda.offer(&link.href, rank);
                    }
                }
            }
            EntryKind::Minutes => {
                for link in links {
                    if link.is_file() {
                        self.minutes.offer(&link.href, 0);
                    } else if link.text.to_lowercase().contains("minute")
                        || link.has_doc_type(MINUTES_DOC_TYPE)
                    {
                        self.minutes.offer(&link.href, 1);
                    }
                }
            }
            EntryKind::Webcast => {
                self.has_webcast = true;
                // The webcast sub-entry carries its own meeting id, distinct from the agenda's.
                if let Some(link) = links.iter().find(|l| l.is_detail()) {
                    self.webcast.offer(&link.href, 0);
                }
            }
            EntryKind::Other => {}
        }
    }

    fn into_record(self, date: Date, name: &str) -> MeetingRecord {
        let mut record = MeetingRecord::new(date);
        record.name = name.to_string();
        record.detail_url = self.detail.url;
        record.agenda_url = self.agenda.url;
        record.minutes_url = self.minutes.url;
        record.webcast_url = self.webcast.url;
        record.has_webcast = self.has_webcast;
        record
    }
}

/// Parses a calendar document into one record per meeting date, newest first.
pub fn parse_feed(document: &str, options: &ParseOptions) -> Vec<MeetingRecord> {
    let html = Html::parse_document(document);
    let (Ok(heading_sel), Ok(link_sel)) = (Selector::parse("h2"), Selector::parse("a[href]"))
    else {
        return Vec::new();
    };

    let body = options.body_name.to_lowercase();
    let mut seen_blocks = HashSet::new();
    let mut by_date: BTreeMap<Date, MeetingDraft> = BTreeMap::new();

    for h2 in html.select(&heading_sel) {
        let Some(block) = enclosing_div(h2) else {
            continue;
        };
        // First heading of a block names the entry.
        if !seen_blocks.insert(block.id()) {
            continue;
        }

        let heading = collapse_whitespace(&h2.text().collect::<String>());
        let lowered = heading.to_lowercase();
        if !lowered.contains(&body) || lowered.contains("cancel") {
            continue;
        }

        let Some(found) = dates::extract_heading_date(&heading) else {
            warn!(target: "civic_core::feed", heading = %heading, "no date in feed heading, skipping");
            continue;
        };

        let links: Vec<Link> = block
            .select(&link_sel)
            .filter_map(|a| {
                let href = resolve_link(a.value().attr("href")?, &options.link_base)?;
                Some(Link {
                    text: collapse_whitespace(&a.text().collect::<String>()),
                    href,
                })
            })
            .collect();

        let kind = EntryKind::from_heading(&heading);
        by_date.entry(found.date).or_default().absorb(kind, &links);
        debug!(
            target: "civic_core::feed",
            heading = %truncate_for_log(&heading),
            date = %dates::to_iso(found.date),
            ?kind,
            "feed entry merged"
        );
    }

    let meetings: Vec<MeetingRecord> = by_date
        .into_iter()
        .rev()
        .map(|(date, draft)| draft.into_record(date, &options.body_name))
        .collect();
    info!(target: "civic_core::feed", count = meetings.len(), "unique meetings parsed from feed");
    meetings
}

/// Absolute URL for an href; `None` for empty targets and non-web schemes
/// (`mailto:`, `javascript:`, `tel:`).
pub fn resolve_link(href: &str, base: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if has_scheme(href) {
        return None;
    }
    Some(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        href.trim_start_matches('/')
    ))
}

// `scheme:` prefix before any path, query or fragment character.
fn has_scheme(href: &str) -> bool {
    let Some((scheme, _)) = href.split_once(':') else {
        return false;
    };
    !scheme.is_empty()
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn enclosing_div(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "div")
}

fn query_value<'a>(href: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = href.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_for_log(text: &str) -> String {
    text.chars().take(65).collect()
}
