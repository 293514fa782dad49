//! LLM-as-judge audit of a generated summary against its transcript.

use crate::dates;
use crate::report::{Backend, ReportGenerator, truncate_chars};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;
use time::{Date, OffsetDateTime};
use tracing::{info, warn};

pub const EXCERPT_CHARS: usize = 5_000;

/// System role for judge calls; replaces the backend's report-writing role.
pub const AUDITOR_ROLE: &str = "You are a civic auditor. Answer only with the requested score line.";

static FAITHFULNESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bF\s*=\s*(\d+)").expect("faithfulness pattern is valid"));
static COVERAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bC\s*=\s*(\d+)").expect("coverage pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Backend that wrote the summary.
    pub model: Backend,
    pub judge: Backend,
    #[serde(with = "dates::iso_date")]
    pub evaluated_on: Date,
    /// Judge's raw answer, or `Error: ...` when the call failed.
    pub evaluation: String,
    pub faithfulness: Option<u8>,
    pub coverage: Option<u8>,
}

/// Both scores from a `Score: F=X, C=X` answer; each is `None` unless it is 1-5.
pub fn parse_scores(answer: &str) -> (Option<u8>, Option<u8>) {
    let score = |re: &Regex| {
        re.captures(answer)
            .and_then(|caps| caps[1].parse::<u8>().ok())
            .filter(|v| (1..=5).contains(v))
    };
    (score(&FAITHFULNESS), score(&COVERAGE))
}

pub fn audit_prompt(transcript_text: &str, summary: &str) -> String {
    format!(
        "You are a civic auditor. Rate this city council summary based on the transcript.\n\
         TRANSCRIPT SNIPPET: {}\n\n\
         SUMMARY: {summary}\n\n\
         Rate 1-5 for:\n1. Faithfulness (Accuracy)\n2. Coverage (Key votes found)\n\
         Return format: 'Score: F=X, C=X'",
        truncate_chars(transcript_text, EXCERPT_CHARS)
    )
}

pub struct SummaryEvaluator {
    judge: ReportGenerator,
}

impl SummaryEvaluator {
    pub fn new(judge: ReportGenerator) -> Self {
        Self { judge }
    }

    pub fn score_summary(&self, transcript_text: &str, summary: &str, model: Backend) -> Evaluation {
        self.score_summary_on(transcript_text, summary, model, OffsetDateTime::now_utc().date())
    }

    pub fn score_summary_on(
        &self,
        transcript_text: &str,
        summary: &str,
        model: Backend,
        evaluated_on: Date,
    ) -> Evaluation {
        let prompt = audit_prompt(transcript_text, summary);
        let answer = self.judge.complete_with_system(&prompt, AUDITOR_ROLE);
        let (evaluation, faithfulness, coverage) = match answer {
            Ok(answer) => {
                let (f, c) = parse_scores(&answer);
                if f.is_none() || c.is_none() {
                    warn!(target: "civic_core::evaluation", model = model.id(), "judge answer has no usable score");
                }
                (answer.trim().to_string(), f, c)
            }
            Err(failure) => (format!("Error: {}", failure.raw), None, None),
        };
        Evaluation {
            model,
            judge: self.judge.backend(),
            evaluated_on,
            evaluation,
            faithfulness,
            coverage,
        }
    }
}

/// Appends one JSON line per evaluation, creating the file and its directory.
pub fn append_evaluations(path: &Path, evaluations: &[Evaluation]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    for evaluation in evaluations {
        let line = serde_json::to_string(evaluation)?;
        writeln!(file, "{line}")?;
    }
    info!(target: "civic_core::evaluation", count = evaluations.len(), path = %path.display(), "evaluations appended");
    Ok(())
}
