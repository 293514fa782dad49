pub mod config;
pub mod dates;
pub mod db;
pub mod error;
pub mod evaluation;
pub mod feed;
pub mod llm;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod transcript;

pub use config::{Credentials, Settings};
pub use error::{CaptionError, ConfigError, FeedError, InvalidRange, StoreError};
pub use feed::{CalendarFeed, DateRange};
pub use report::{Backend, ReportGenerator};
pub use schema::{FailureKind, MeetingRecord, Report, ReportOutcome, TranscriptResult, TranscriptSegment};
pub use transcript::{TranscriptNotFound, TranscriptResolver};
