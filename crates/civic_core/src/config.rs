use crate::report::Backend;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "council.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub institution: InstitutionSettings,
    pub feed: FeedSettings,
    pub video: VideoSettings,
    pub report: ReportSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InstitutionSettings {
    pub city: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub url: String,
    pub link_base: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_backoff_secs: u64,
    pub lookback_days: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub search_url: String,
    pub watch_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub candidate_cap: usize,
    pub min_segments: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub default_backend: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub database_path: String,
    pub evaluation_log: String,
}

impl Default for InstitutionSettings {
    fn default() -> Self {
        Self {
            city: "San Ramon".to_string(),
            body: "City Council".to_string(),
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: "https://sanramonca.iqm2.com/Services/RSS.aspx?Feed=Calendar".to_string(),
            link_base: "https://sanramonca.iqm2.com/Citizens".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            timeout_secs: 15,
            max_attempts: 2,
            retry_backoff_secs: 2,
            lookback_days: 90,
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            search_url: "https://www.youtube.com/results".to_string(),
            watch_url: "https://www.youtube.com/watch".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".to_string(),
            timeout_secs: 10,
            candidate_cap: 8,
            min_segments: 20,
        }
    }
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            default_backend: Backend::Gemini.id().to_string(),
            temperature: 0.1,
            timeout_secs: 180,
            database_path: "council_reports.db".to_string(),
            evaluation_log: "logs/model_evaluation.jsonl".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file (if it exists), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut settings = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(backend) = non_empty(lookup("SUMMARIZER_BACKEND")) {
            self.report.default_backend = backend.to_lowercase();
        }
        if let Some(path) = non_empty(lookup("COUNCIL_DB_PATH")) {
            self.report.database_path = path;
        }
        if let Some(url) = non_empty(lookup("COUNCIL_FEED_URL")) {
            self.feed.url = url;
        }
    }

    /// "San Ramon City Council"
    pub fn institution_name(&self) -> String {
        format!("{} {}", self.institution.city, self.institution.body)
            .trim()
            .to_string()
    }

    pub fn default_backend(&self) -> Result<Backend, crate::ConfigError> {
        self.report.default_backend.parse()
    }
}

impl FeedSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

impl VideoSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// API keys and model overrides; never read from the config file.
#[derive(Clone, Default)]
pub struct Credentials {
    values: HashMap<String, String>,
}

const CREDENTIAL_VARS: &[&str] = &[
    "GROQ_API_KEY",
    "GEMINI_API_KEY",
    "OPENROUTER_API_KEY",
    "GROQ_MODEL",
    "GEMINI_MODEL",
];

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let values = CREDENTIAL_VARS
            .iter()
            .filter_map(|key| non_empty(lookup(key)).map(|value| (key.to_string(), value)))
            .collect();
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn api_key(&self, backend: Backend) -> Option<&str> {
        self.get(backend.credential_var())
    }

    pub fn model_for(&self, backend: Backend) -> String {
        backend
            .model_override_var()
            .and_then(|var| self.get(var))
            .unwrap_or(backend.default_model())
            .to_string()
    }
}

// Key values print as `<redacted>`; model overrides are not secret.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: BTreeMap<&str, &str> = self
            .values
            .iter()
            .map(|(key, value)| {
                let value = if key.ends_with("_API_KEY") {
                    "<redacted>"
                } else {
                    value.as_str()
                };
                (key.as_str(), value)
            })
            .collect();
        f.debug_struct("Credentials").field("values", &shown).finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
