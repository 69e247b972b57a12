use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Log domains the relay tags every event with (the `ar_*!` macros in the
/// runtime crate): lifecycle, ingest connections, the processing pipeline,
/// publishing, configuration, and resource maintenance.
pub const LOG_DOMAINS: &[&str] = &["sys", "conn", "pipe", "pub", "conf", "res"];

const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// LoggingConfig
// ---------------------------------------------------------------------------

/// Logging configuration. Everything defaults, so `logging:` may be omitted
/// from `relay.yaml` entirely.
///
/// Verbosity is tuned per relay *domain*, not per Rust module path: an
/// operator writes `domains: {pipe: debug, pub: warn}` to make the pipeline
/// chatty and mute routine publishing noise without knowing crate
/// internals. `RUST_LOG`, when set, overrides all of this with standard
/// env-filter directives.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Baseline level for events of any domain.
    pub level: String,
    /// Per-domain overrides; keys must be one of [`LOG_DOMAINS`].
    pub domains: BTreeMap<String, String>,
    /// Optional log file, written in addition to stderr. Relative paths
    /// resolve against the config file's directory.
    pub file: Option<PathBuf>,
    /// Output format: `plain` (single-line, domain-tagged) or `json`
    /// (structured).
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            domains: BTreeMap::new(),
            file: None,
            format: LogFormat::Plain,
        }
    }
}

impl LoggingConfig {
    /// Syntactic validation, run with the rest of `relay.yaml` validation:
    /// a typo in a level or domain name fails at load, not at first log.
    pub fn validate(&self) -> anyhow::Result<()> {
        check_level(&self.level).map_err(|e| anyhow::anyhow!("logging.level: {e}"))?;
        for (domain, level) in &self.domains {
            if !LOG_DOMAINS.contains(&domain.as_str()) {
                anyhow::bail!(
                    "logging.domains: unknown domain {domain:?} (expected one of {LOG_DOMAINS:?})"
                );
            }
            check_level(level).map_err(|e| anyhow::anyhow!("logging.domains.{domain}: {e}"))?;
        }
        Ok(())
    }
}

fn check_level(level: &str) -> anyhow::Result<()> {
    if LOG_LEVELS.contains(&level) {
        Ok(())
    } else {
        anyhow::bail!("unknown log level {level:?} (expected one of {LOG_LEVELS:?})")
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
