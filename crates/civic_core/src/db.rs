use crate::dates;
use crate::error::StoreError;
use crate::report::Backend;
use crate::schema::{FailureKind, Report, ReportOutcome};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::path::Path;
use time::Date;
use tracing::{error, info};

/// Persistence adapter for generated reports.
pub trait ReportStore {
    fn insert_report(&self, report: &Report) -> Result<i64, StoreError>;
    /// All rows, newest first.
    fn list_reports(&self) -> Result<Vec<StoredReport>, StoreError>;
    fn reports_for_date(&self, date: Date) -> Result<Vec<StoredReport>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredReport {
    pub id: i64,
    pub created_at: String,
    pub report: Report,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistenceOutcome {
    Saved { id: i64 },
    NotConfigured,
    Failed { reason: String },
}

/// Never fails the caller; the outcome says what happened.
pub fn save_report(store: Option<&dyn ReportStore>, report: &Report) -> PersistenceOutcome {
    let Some(store) = store else {
        info!(target: "civic_core::db", "no report store configured, report not saved");
        return PersistenceOutcome::NotConfigured;
    };
    match store.insert_report(report) {
        Ok(id) => {
            info!(target: "civic_core::db", id, meeting = %dates::to_iso(report.meeting_date), "report saved");
            PersistenceOutcome::Saved { id }
        }
        Err(e) => {
            error!(target: "civic_core::db", error = %e, "report could not be saved");
            PersistenceOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}

/// Stand-in for a configured store that could not be opened; every call fails
/// with the original reason, so saves report `Failed` rather than `NotConfigured`.
#[derive(Debug, Clone)]
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(error: &StoreError) -> Self {
        Self {
            reason: error.to_string(),
        }
    }

    fn error(&self) -> StoreError {
        StoreError::Unavailable(self.reason.clone())
    }
}

impl ReportStore for UnavailableStore {
    fn insert_report(&self, _: &Report) -> Result<i64, StoreError> {
        Err(self.error())
    }

    fn list_reports(&self) -> Result<Vec<StoredReport>, StoreError> {
        Err(self.error())
    }

    fn reports_for_date(&self, _: Date) -> Result<Vec<StoredReport>, StoreError> {
        Err(self.error())
    }
}

pub struct SqliteReportStore {
    conn: Connection,
}

impl SqliteReportStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        init(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init(&conn)?;
        Ok(Self { conn })
    }

    pub fn get(&self, id: i64) -> Result<Option<StoredReport>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM council_reports WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], read_row)
            .optional()?;
        row.map(into_stored).transpose()
    }

    fn query(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<StoredReport>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, read_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(into_stored(row?)?);
        }
        Ok(out)
    }
}

fn init(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS council_reports (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          meeting_date TEXT NOT NULL,
          title TEXT NOT NULL,
          summary TEXT NOT NULL,
          backend_used TEXT NOT NULL,
          status TEXT NOT NULL,
          failure_kind TEXT,
          agenda_url TEXT,
          minutes_url TEXT,
          webcast_url TEXT,
          created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );

        CREATE INDEX IF NOT EXISTS idx_council_reports_meeting_date ON council_reports(meeting_date);
        "#,
    )?;
    Ok(())
}

const COLUMNS: &str = "id, created_at, meeting_date, title, summary, backend_used, status, \
                       failure_kind, agenda_url, minutes_url, webcast_url";

// Raw column values; validated in `into_stored` so bad rows surface as `Corrupt`.
struct RawRow {
    id: i64,
    created_at: String,
    meeting_date: String,
    title: String,
    summary: String,
    backend_used: String,
    status: String,
    failure_kind: Option<String>,
    agenda_url: Option<String>,
    minutes_url: Option<String>,
    webcast_url: Option<String>,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        created_at: row.get(1)?,
        meeting_date: row.get(2)?,
        title: row.get(3)?,
        summary: row.get(4)?,
        backend_used: row.get(5)?,
        status: row.get(6)?,
        failure_kind: row.get(7)?,
        agenda_url: row.get(8)?,
        minutes_url: row.get(9)?,
        webcast_url: row.get(10)?,
    })
}

fn into_stored(raw: RawRow) -> Result<StoredReport, StoreError> {
    let meeting_date = dates::parse_iso(&raw.meeting_date).ok_or_else(|| {
        StoreError::Corrupt(format!("row {}: meeting_date '{}'", raw.id, raw.meeting_date))
    })?;
    let backend_used: Backend = raw
        .backend_used
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("row {}: backend '{}'", raw.id, raw.backend_used)))?;
    let outcome = match raw.status.as_str() {
        "generated" => ReportOutcome::Generated,
        "failed" => {
            let kind = raw
                .failure_kind
                .as_deref()
                .and_then(FailureKind::parse)
                .unwrap_or(FailureKind::Generic);
            ReportOutcome::Failed { kind }
        }
        other => {
            return Err(StoreError::Corrupt(format!("row {}: status '{other}'", raw.id)));
        }
    };
    Ok(StoredReport {
        id: raw.id,
        created_at: raw.created_at,
        report: Report {
            meeting_date,
            title: raw.title,
            body: raw.summary,
            backend_used,
            outcome,
            agenda_url: raw.agenda_url,
            minutes_url: raw.minutes_url,
            webcast_url: raw.webcast_url,
        },
    })
}

impl ReportStore for SqliteReportStore {
    fn insert_report(&self, report: &Report) -> Result<i64, StoreError> {
        let (status, failure_kind) = match report.outcome {
            ReportOutcome::Generated => ("generated", None),
            ReportOutcome::Failed { kind } => ("failed", Some(kind.as_str())),
        };
        self.conn.execute(
            r#"
            INSERT INTO council_reports (
              meeting_date, title, summary, backend_used, status,
              failure_kind, agenda_url, minutes_url, webcast_url
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                dates::to_iso(report.meeting_date),
                report.title,
                report.body,
                report.backend_used.id(),
                status,
                failure_kind,
                report.agenda_url,
                report.minutes_url,
                report.webcast_url,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_reports(&self) -> Result<Vec<StoredReport>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM council_reports ORDER BY created_at DESC, id DESC");
        self.query(&sql, [])
    }

    fn reports_for_date(&self, date: Date) -> Result<Vec<StoredReport>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM council_reports WHERE meeting_date = ?1 ORDER BY created_at DESC, id DESC"
        );
        self.query(&sql, params![dates::to_iso(date)])
    }
}
