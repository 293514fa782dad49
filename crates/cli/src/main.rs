use anyhow::{Context, Result, bail};
use civic_core::db::{PersistenceOutcome, ReportStore, SqliteReportStore, StoredReport, UnavailableStore};
use civic_core::evaluation::{SummaryEvaluator, append_evaluations};
use civic_core::pipeline::{AnalysisOutcome, analyze_meeting};
use civic_core::{
    Backend, CalendarFeed, Credentials, DateRange, MeetingRecord, ReportGenerator, Settings,
    TranscriptResolver, dates,
};
use clap::{Parser, Subcommand};
use schemars::schema_for;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use time::Date;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "council")]
#[command(about = "Council meeting intelligence CLI", long_about = None)]
struct Cli {
    /// Settings file (default: ./council.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List meetings from the calendar feed within a date range
    Meetings {
        /// Start date (YYYY-MM-DD or MM/DD/YYYY)
        #[arg(long)]
        start: String,
        /// End date (YYYY-MM-DD or MM/DD/YYYY)
        #[arg(long)]
        end: String,
        #[arg(long)]
        json: bool,
    },
    /// Show the most recent meeting in the lookback window
    Latest {
        #[arg(long)]
        json: bool,
    },
    /// Resolve the meeting video transcript for a date
    Transcript {
        date: String,
        /// Print the joined transcript text instead of a summary line
        #[arg(long)]
        text: bool,
    },
    /// Transcript, report and archive for one meeting (latest by default)
    Analyze {
        #[arg(long)]
        date: Option<String>,
        /// groq_llama, gemini, trinity or deepseek_r1 (default from settings)
        #[arg(long)]
        backend: Option<String>,
        /// Do not write the report to the archive database
        #[arg(long)]
        no_save: bool,
        #[arg(long)]
        json: bool,
    },
    /// List archived reports, newest first
    Archive {
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Generate a report per backend for one meeting and score each with a judge backend
    Evaluate {
        #[arg(long)]
        date: String,
        /// Backends to compare (default: every backend with a credential)
        #[arg(long, value_delimiter = ',')]
        backends: Vec<String>,
        #[arg(long, default_value = "gemini")]
        judge: String,
    },
    /// Obsidian vault export of the report archive
    Vault {
        #[command(subcommand)]
        command: VaultCommands,
    },
    /// Export canonical JSON Schemas to the ./schemas directory
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

#[derive(Subcommand)]
enum VaultCommands {
    /// Rebuild report, meeting and index notes
    Build {
        #[arg(long, default_value = "vault")]
        out_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for canonical types
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Meetings { start, end, json } => meetings(&settings, &start, &end, json),
        Commands::Latest { json } => latest(&settings, json),
        Commands::Transcript { date, text } => transcript(&settings, &date, text),
        Commands::Analyze {
            date,
            backend,
            no_save,
            json,
        } => analyze(&settings, date.as_deref(), backend.as_deref(), no_save, json),
        Commands::Archive { date, json } => archive(&settings, date.as_deref(), json),
        Commands::Evaluate {
            date,
            backends,
            judge,
        } => evaluate(&settings, &date, &backends, &judge),
        Commands::Vault { command } => match command {
            VaultCommands::Build { out_dir } => vault_build(&settings, &out_dir),
        },
        Commands::Schema { command } => match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        },
    }
}

fn parse_date(input: &str) -> Result<Date> {
    dates::parse_flexible(input).with_context(|| format!("unrecognised date '{input}'"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_meeting(meeting: &MeetingRecord) {
    println!("{} {} ({})", meeting.iso_date(), meeting.name, meeting.display_date);
    for (label, url) in [
        ("details", &meeting.detail_url),
        ("agenda", &meeting.agenda_url),
        ("minutes", &meeting.minutes_url),
        ("webcast", &meeting.webcast_url),
    ] {
        if let Some(url) = url {
            println!("  {label:<8} {url}");
        }
    }
}

fn meetings(settings: &Settings, start: &str, end: &str, json: bool) -> Result<()> {
    let range = DateRange::parse(start, end)?;
    let feed = CalendarFeed::from_settings(settings)?;
    let meetings = feed.fetch_meetings_checked(range)?;
    if json {
        return print_json(&meetings);
    }
    if meetings.is_empty() {
        println!("No meetings between {start} and {end}.");
    }
    meetings.iter().for_each(print_meeting);
    Ok(())
}

fn latest(settings: &Settings, json: bool) -> Result<()> {
    let feed = CalendarFeed::from_settings(settings)?;
    let latest = feed.fetch_latest_meeting();
    if json {
        return print_json(&latest);
    }
    match latest {
        Some(meeting) => print_meeting(&meeting),
        None => println!(
            "No meetings in the last {} days.",
            settings.feed.lookback_days
        ),
    }
    Ok(())
}

fn transcript(settings: &Settings, date: &str, text: bool) -> Result<()> {
    let date = parse_date(date)?;
    let resolver = TranscriptResolver::from_settings(settings)?;
    match resolver.resolve_transcript(&dates::to_iso(date)) {
        Ok(found) if text => println!("{}", found.text_blob()),
        Ok(found) => println!(
            "Video {}: {} segments, {} characters",
            found.video_id(),
            found.len(),
            found.text_blob().chars().count()
        ),
        Err(not_found) => bail!("{}", not_found.user_message()),
    }
    Ok(())
}

/// The meeting on `date` from the feed, or a bare record when the feed has none.
fn meeting_for(settings: &Settings, date: Option<&str>) -> Result<MeetingRecord> {
    let feed = CalendarFeed::from_settings(settings)?;
    let Some(date) = date else {
        return feed
            .fetch_latest_meeting()
            .with_context(|| format!("no meetings in the last {} days", settings.feed.lookback_days));
    };
    let date = parse_date(date)?;
    let found = feed.fetch_meetings(DateRange::new(date, date)?)?.into_iter().next();
    Ok(found.unwrap_or_else(|| {
        warn!(date = %dates::to_iso(date), "meeting not in calendar feed, analyzing without document links");
        let mut meeting = MeetingRecord::new(date);
        meeting.name = settings.institution.body.clone();
        meeting
    }))
}

/// A configured archive that fails to open still yields a store, one whose saves
/// fail with the open error instead of reading as "not configured".
fn open_store(settings: &Settings) -> Box<dyn ReportStore> {
    match SqliteReportStore::open(&settings.report.database_path) {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!(path = %settings.report.database_path, error = %e, "report archive unavailable");
            Box::new(UnavailableStore::new(&e))
        }
    }
}

fn select_backend(settings: &Settings, requested: Option<&str>) -> Result<Backend> {
    Ok(match requested {
        Some(id) => id.parse()?,
        None => settings.default_backend()?,
    })
}

fn analyze(
    settings: &Settings,
    date: Option<&str>,
    backend: Option<&str>,
    no_save: bool,
    json: bool,
) -> Result<()> {
    let backend = select_backend(settings, backend)?;
    let generator = ReportGenerator::new(backend, settings, &Credentials::from_env())?;
    let meeting = meeting_for(settings, date)?;
    let resolver = TranscriptResolver::from_settings(settings)?;
    let store = (!no_save).then(|| open_store(settings));

    let outcome = analyze_meeting(&meeting, &resolver, &generator, store.as_deref());
    let (report, persistence) = match outcome {
        AnalysisOutcome::NoTranscript(not_found) => bail!("{}", not_found.user_message()),
        AnalysisOutcome::Reported {
            report,
            persistence,
            ..
        } => (report, persistence),
    };

    if json {
        print_json(&report)?;
    } else {
        println!("# {} - {}\n", report.title, meeting.display_date);
        println!("{}", report.body);
        match &persistence {
            PersistenceOutcome::Saved { id } => eprintln!("Saved to archive as report #{id}."),
            PersistenceOutcome::NotConfigured => eprintln!("Report not saved."),
            PersistenceOutcome::Failed { reason } => eprintln!("Report not saved: {reason}"),
        }
    }
    if !report.is_success() {
        bail!("report generation failed ({})", report.failure_kind().map(|k| k.as_str()).unwrap_or("generic"));
    }
    Ok(())
}

fn archive(settings: &Settings, date: Option<&str>, json: bool) -> Result<()> {
    let store = SqliteReportStore::open(&settings.report.database_path)?;
    let reports: Vec<StoredReport> = match date {
        Some(date) => store.reports_for_date(parse_date(date)?)?,
        None => store.list_reports()?,
    };
    if json {
        return print_json(&reports);
    }
    if reports.is_empty() {
        println!("Archive is empty.");
    }
    for stored in &reports {
        let status = match stored.report.failure_kind() {
            None => "generated".to_string(),
            Some(kind) => format!("failed: {kind}"),
        };
        println!(
            "#{:<4} {} {:<12} {:<10} {}",
            stored.id,
            dates::to_iso(stored.report.meeting_date),
            stored.report.backend_used.id(),
            status,
            stored.created_at
        );
    }
    Ok(())
}

fn evaluate(settings: &Settings, date: &str, backends: &[String], judge: &str) -> Result<()> {
    let credentials = Credentials::from_env();
    let judge = ReportGenerator::new(judge.parse()?, settings, &credentials)?;
    let candidates: Vec<Backend> = if backends.is_empty() {
        Backend::ALL
            .into_iter()
            .filter(|b| credentials.api_key(*b).is_some())
            .collect()
    } else {
        backends.iter().map(|b| b.parse()).collect::<Result<_, _>>()?
    };
    if candidates.is_empty() {
        bail!("no backend has a configured API key");
    }

    let meeting = meeting_for(settings, Some(date))?;
    let resolver = TranscriptResolver::from_settings(settings)?;
    let transcript = match resolver.resolve_transcript(&meeting.iso_date()) {
        Ok(transcript) => transcript,
        Err(not_found) => bail!("{}", not_found.user_message()),
    };
    let transcript_text = transcript.text_blob();
    let evaluator = SummaryEvaluator::new(judge);

    let mut evaluations = Vec::new();
    for backend in candidates {
        let generator = ReportGenerator::new(backend, settings, &credentials)?;
        let report = generator.generate_report(&meeting, &transcript);
        if !report.is_success() {
            println!("{:<12} skipped: {}", backend.id(), report.body);
            continue;
        }
        let evaluation = evaluator.score_summary(&transcript_text, &report.body, backend);
        let score = |v: Option<u8>| v.map_or("-".to_string(), |v| v.to_string());
        println!(
            "{:<12} F={} C={}",
            backend.id(),
            score(evaluation.faithfulness),
            score(evaluation.coverage)
        );
        evaluations.push(evaluation);
    }

    if !evaluations.is_empty() {
        append_evaluations(Path::new(&settings.report.evaluation_log), &evaluations)?;
        eprintln!("Appended {} evaluation(s) to {}", evaluations.len(), settings.report.evaluation_log);
    }
    Ok(())
}

fn vault_build(settings: &Settings, out_dir: &Path) -> Result<()> {
    let store = SqliteReportStore::open(&settings.report.database_path)?;
    let reports = store.list_reports()?;
    let summary = obsidian::build_vault(&reports, out_dir)?;
    println!(
        "Wrote {} report note(s) for {} meeting(s) to {}",
        summary.reports,
        summary.meetings,
        out_dir.display()
    );
    Ok(())
}

fn schema_export(out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir)?;

    let schemas = [
        ("MeetingRecord", schema_for!(civic_core::MeetingRecord)),
        ("TranscriptResult", schema_for!(civic_core::TranscriptResult)),
        ("Report", schema_for!(civic_core::Report)),
    ];
    for (name, schema) in schemas {
        let json = serde_json::to_string_pretty(&schema)?;
        fs::write(out_dir.join(format!("{name}.schema.json")), json)?;
    }

    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}
