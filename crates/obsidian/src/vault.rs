use anyhow::{Context, Result};
use civic_core::db::StoredReport;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use time::Date;
use time::macros::format_description;
use tracing::info;

const GENERATED_NOTICE: &str = "This index is generated. Do not edit manually.";

pub struct VaultPaths {
    pub root: PathBuf,
    pub index_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub meetings_dir: PathBuf,
}

impl VaultPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            index_dir: root.join("00_Index"),
            reports_dir: root.join("Reports"),
            meetings_dir: root.join("Meetings"),
            root,
        }
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.index_dir, &self.reports_dir, &self.meetings_dir] {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VaultSummary {
    pub reports: usize,
    pub meetings: usize,
}

/// Writes one note per stored report, one note per meeting date and the two MOCs.
/// `reports` is expected newest first, as the store lists them.
pub fn build_vault(reports: &[StoredReport], vault_root: &Path) -> Result<VaultSummary> {
    let paths = VaultPaths::new(vault_root);
    paths.ensure()?;

    let mut report_index = moc_header("MOC - Reports");
    let mut by_meeting: BTreeMap<Date, Vec<&StoredReport>> = BTreeMap::new();

    for stored in reports {
        write_report_note(&paths, stored)?;
        report_index.push(format!(
            "- [[Reports/{}|{}]]",
            report_note_name(stored),
            report_link_title(stored)
        ));
        by_meeting
            .entry(stored.report.meeting_date)
            .or_default()
            .push(stored);
    }
    if reports.is_empty() {
        report_index.push("_No reports archived yet._".to_string());
    }
    fs::write(paths.index_dir.join("MOC - Reports.md"), report_index.join("\n"))?;

    let mut meeting_index = moc_header("MOC - Meetings");
    for (date, meeting_reports) in by_meeting.iter().rev() {
        write_meeting_note(&paths, *date, meeting_reports)?;
        let generated = meeting_reports.iter().filter(|r| r.report.is_success()).count();
        meeting_index.push(format!(
            "- [[Meetings/{}|{}]] ({generated}/{} generated)",
            iso(*date),
            long_date(*date),
            meeting_reports.len()
        ));
    }
    if by_meeting.is_empty() {
        meeting_index.push("_No meetings archived yet._".to_string());
    }
    fs::write(paths.index_dir.join("MOC - Meetings.md"), meeting_index.join("\n"))?;

    let summary = VaultSummary {
        reports: reports.len(),
        meetings: by_meeting.len(),
    };
    info!(
        target: "obsidian::vault",
        reports = summary.reports,
        meetings = summary.meetings,
        root = %paths.root.display(),
        "vault built"
    );
    Ok(summary)
}

fn moc_header(title: &str) -> Vec<String> {
    vec![
        format!("# {title}"),
        String::new(),
        GENERATED_NOTICE.to_string(),
        String::new(),
    ]
}

fn iso(date: Date) -> String {
    civic_core::dates::to_iso(date)
}

fn long_date(date: Date) -> String {
    date.format(format_description!("[month repr:long] [day padding:none], [year]"))
        .unwrap_or_else(|_| iso(date))
}

fn report_note_name(stored: &StoredReport) -> String {
    format!(
        "{}-{}-{}",
        iso(stored.report.meeting_date),
        stored.report.backend_used.id(),
        stored.id
    )
}

fn report_link_title(stored: &StoredReport) -> String {
    let status = if stored.report.is_success() { "" } else { " (failed)" };
    format!(
        "{} {} - {}{status}",
        iso(stored.report.meeting_date),
        stored.report.title,
        stored.report.backend_used.label()
    )
}

#[derive(Serialize)]
struct ReportFrontMatter<'a> {
    id: i64,
    meeting_date: String,
    title: &'a str,
    backend: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_kind: Option<&'static str>,
    created_at: &'a str,
    agenda_url: Option<&'a str>,
    minutes_url: Option<&'a str>,
    webcast_url: Option<&'a str>,
    tags: Vec<String>,
}

fn write_report_note(paths: &VaultPaths, stored: &StoredReport) -> Result<()> {
    let report = &stored.report;
    let failure_kind = report.failure_kind().map(|k| k.as_str());
    let mut tags = vec!["council-report".to_string(), format!("backend/{}", report.backend_used.id())];
    if let Some(kind) = failure_kind {
        tags.push(format!("failure/{kind}"));
    }
    let front = ReportFrontMatter {
        id: stored.id,
        meeting_date: iso(report.meeting_date),
        title: &report.title,
        backend: report.backend_used.id(),
        status: if report.is_success() { "generated" } else { "failed" },
        failure_kind,
        created_at: &stored.created_at,
        agenda_url: report.agenda_url.as_deref(),
        minutes_url: report.minutes_url.as_deref(),
        webcast_url: report.webcast_url.as_deref(),
        tags,
    };

    let mut md = String::new();
    md.push_str("---\n");
    md.push_str(&serde_yaml::to_string(&front)?);
    md.push_str("---\n\n");
    md.push_str(&format!("# {} - {}\n\n", report.title, long_date(report.meeting_date)));
    md.push_str(&format!(
        "Meeting: [[Meetings/{}|{}]]\n",
        iso(report.meeting_date),
        long_date(report.meeting_date)
    ));
    md.push_str(&format!("Backend: {}\n\n", report.backend_used.label()));
    md.push_str(report.body.trim_end());
    md.push('\n');

    let note_path = paths.reports_dir.join(format!("{}.md", report_note_name(stored)));
    fs::write(&note_path, md).with_context(|| format!("writing {}", note_path.display()))?;
    Ok(())
}

fn write_meeting_note(paths: &VaultPaths, date: Date, reports: &[&StoredReport]) -> Result<()> {
    // any report carries the meeting's links; the newest wins
    let first = reports.first().map(|r| &r.report);

    let mut md = String::new();
    md.push_str("---\n");
    md.push_str(&format!("meeting_date: {}\n", iso(date)));
    md.push_str(&format!("report_count: {}\n", reports.len()));
    md.push_str("---\n\n");
    md.push_str(&format!("# Council Meeting {}\n\n", long_date(date)));

    md.push_str("## Documents\n");
    let links = [
        ("Agenda", first.and_then(|r| r.agenda_url.as_deref())),
        ("Minutes", first.and_then(|r| r.minutes_url.as_deref())),
        ("Webcast", first.and_then(|r| r.webcast_url.as_deref())),
    ];
    for (label, url) in links {
        match url {
            Some(url) => md.push_str(&format!("- {label}: {url}\n")),
            None => md.push_str(&format!("- {label}: _not published_\n")),
        }
    }

    md.push_str("\n## Reports\n");
    for stored in reports {
        md.push_str(&format!(
            "- [[Reports/{}|{}]]\n",
            report_note_name(stored),
            report_link_title(stored)
        ));
    }

    fs::write(paths.meetings_dir.join(format!("{}.md", iso(date))), md)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_core::{Backend, FailureKind, Report, ReportOutcome};
    use time::macros::date;

    fn stored(id: i64, day: Date, backend: Backend, outcome: ReportOutcome) -> StoredReport {
        StoredReport {
            id,
            created_at: format!("2025-02-0{id}T10:00:00.000Z"),
            report: Report {
                meeting_date: day,
                title: "City Council Meeting".to_string(),
                body: "## Executive Summary\nBudget adopted.\n".to_string(),
                backend_used: backend,
                outcome,
                agenda_url: Some("https://example.test/agenda".to_string()),
                minutes_url: None,
                webcast_url: None,
            },
        }
    }

    fn archive() -> Vec<StoredReport> {
        vec![
            stored(3, date!(2025 - 01 - 28), Backend::Gemini, ReportOutcome::Generated),
            stored(
                2,
                date!(2025 - 01 - 14),
                Backend::GroqLlama,
                ReportOutcome::Failed {
                    kind: FailureKind::RateLimited,
                },
            ),
            stored(1, date!(2025 - 01 - 14), Backend::Gemini, ReportOutcome::Generated),
        ]
    }

    #[test]
    fn writes_notes_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let summary = build_vault(&archive(), dir.path()).unwrap();
        assert_eq!(summary, VaultSummary { reports: 3, meetings: 2 });

        let note = fs::read_to_string(dir.path().join("Reports/2025-01-14-groq_llama-2.md")).unwrap();
        let front = note
            .strip_prefix("---\n")
            .and_then(|rest| rest.split("---\n").next())
            .unwrap();
        let yaml: serde_yaml::Value = serde_yaml::from_str(front).unwrap();
        assert_eq!(yaml["status"].as_str(), Some("failed"));
        assert_eq!(yaml["failure_kind"].as_str(), Some("rate_limited"));
        assert_eq!(yaml["meeting_date"].as_str(), Some("2025-01-14"));
        assert!(note.contains("## Executive Summary"));

        let meetings_moc = fs::read_to_string(dir.path().join("00_Index/MOC - Meetings.md")).unwrap();
        let newest = meetings_moc.find("2025-01-28").unwrap();
        let older = meetings_moc.find("2025-01-14").unwrap();
        assert!(newest < older);
        assert!(meetings_moc.contains("(1/2 generated)"));

        let meeting = fs::read_to_string(dir.path().join("Meetings/2025-01-14.md")).unwrap();
        assert!(meeting.contains("# Council Meeting January 14, 2025"));
        assert!(meeting.contains("- Minutes: _not published_"));
        assert!(meeting.contains("[[Reports/2025-01-14-gemini-1|"));
    }

    #[test]
    fn empty_archive_still_writes_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let summary = build_vault(&[], dir.path()).unwrap();
        assert_eq!(summary, VaultSummary::default());
        let moc = fs::read_to_string(dir.path().join("00_Index/MOC - Reports.md")).unwrap();
        assert!(moc.contains(GENERATED_NOTICE));
        assert!(moc.contains("_No reports archived yet._"));
    }
}
