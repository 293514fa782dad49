use crate::db::{PersistenceOutcome, ReportStore, save_report};
use crate::report::ReportGenerator;
use crate::schema::{MeetingRecord, Report};
use crate::transcript::{CaptionSource, TranscriptNotFound, TranscriptResolver, VideoIndex};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    NoTranscript(TranscriptNotFound),
    Reported {
        report: Report,
        segments: usize,
        persistence: PersistenceOutcome,
    },
}

/// Transcript, then report, then save. Failed reports are saved too, so the
/// archive shows what was attempted.
pub fn analyze_meeting<I: VideoIndex, C: CaptionSource>(
    meeting: &MeetingRecord,
    resolver: &TranscriptResolver<I, C>,
    generator: &ReportGenerator,
    store: Option<&dyn ReportStore>,
) -> AnalysisOutcome {
    let transcript = match resolver.resolve_transcript(&meeting.iso_date()) {
        Ok(transcript) => transcript,
        Err(not_found) => return AnalysisOutcome::NoTranscript(not_found),
    };

    let report = generator.generate_report(meeting, &transcript);
    info!(
        target: "civic_core::pipeline",
        meeting = %meeting.iso_date(),
        backend = report.backend_used.id(),
        success = report.is_success(),
        "report generated"
    );
    let persistence = save_report(store, &report);

    AnalysisOutcome::Reported {
        report,
        segments: transcript.len(),
        persistence,
    }
}
