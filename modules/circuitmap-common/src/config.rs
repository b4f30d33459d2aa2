use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Worker configuration loaded from environment variables (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Segmentation service (skeleton geometry + segment lookup)
    pub segmentation_url: String,

    // ID encoding shared with previously imported data
    pub connector_id_offset: i64,
    pub import_user_id: i64,

    // Segments never used as link sources
    pub ignored_segment_ids: BTreeSet<i64>,

    // Workers
    pub fetch_timeout: Duration,
    pub max_concurrent_runs: usize,
    pub poll_interval: Duration,
    pub progress_checkpoint_every: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            segmentation_url: required_env("SEGMENTATION_URL")?,
            connector_id_offset: required_env("CONNECTOR_ID_OFFSET")?
                .parse()
                .context("CONNECTOR_ID_OFFSET must be an integer")?,
            import_user_id: required_env("IMPORT_USER_ID")?
                .parse()
                .context("IMPORT_USER_ID must be an integer")?,
            ignored_segment_ids: parse_id_list(
                &env::var("CIRCUITMAP_IGNORED_SEGMENT_IDS").unwrap_or_default(),
            )?,
            fetch_timeout: Duration::from_secs(parsed_env("FETCH_TIMEOUT_SECS", 30)?),
            max_concurrent_runs: parsed_env("MAX_CONCURRENT_RUNS", 4)?,
            poll_interval: Duration::from_secs(parsed_env("POLL_INTERVAL_SECS", 5)?),
            progress_checkpoint_every: parsed_env("PROGRESS_CHECKPOINT_EVERY", 10)?,
        })
    }

    /// Log the loaded configuration without leaking credentials.
    pub fn log_redacted(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", redact_url(&self.database_url));
        tracing::info!("  SEGMENTATION_URL: {}", self.segmentation_url);
        tracing::info!("  CONNECTOR_ID_OFFSET: {}", self.connector_id_offset);
        tracing::info!("  IMPORT_USER_ID: {}", self.import_user_id);
        tracing::info!("  ignored segments: {:?}", self.ignored_segment_ids);
        tracing::info!(
            "  fetch timeout {:?}, {} concurrent runs, poll every {:?}",
            self.fetch_timeout,
            self.max_concurrent_runs,
            self.poll_interval
        );
    }
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} environment variable is required"))
}

fn parsed_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {raw:?}")),
        Err(_) => Ok(default),
    }
}

/// Parse a comma separated list of segment IDs. Blank entries are skipped.
pub fn parse_id_list(raw: &str) -> Result<BTreeSet<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .with_context(|| format!("invalid segment id {s:?}"))
        })
        .collect()
}

/// Replace the password component of a connection URL. Unparseable URLs are
/// hidden entirely.
fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() && parsed.set_password(Some("***")).is_err() {
                return "<redacted>".to_string();
            }
            parsed.to_string()
        }
        Err(_) => "<redacted>".to_string(),
    }
}
