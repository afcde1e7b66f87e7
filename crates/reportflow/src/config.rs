//! Pipeline configuration.
//!
//! The pipeline consumes an already-resolved [`PipelineConfig`]; resolving
//! one from a TOML file and CLI flags is the binary's job. Retry ceilings
//! and intervals are knobs here rather than constants, defaulted to the
//! values the system was tuned with.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use reportflow_protocol::ReportKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One configured watch target: a plain file, a directory, or a `*`/`?`
/// mask, to be parsed with the given report grammar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub kind: ReportKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Per-file detail in watcher and parser summaries.
    #[serde(default)]
    pub verbose: bool,

    /// Accept report files whose mtime precedes the build start.
    #[serde(default)]
    pub parse_out_of_date: bool,

    /// Files modified before this instant are ignored unless
    /// `parse_out_of_date` is set.
    #[serde(default = "Utc::now")]
    pub build_start: DateTime<Utc>,

    /// Watcher rescan interval.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Processor sleep between attempts at a still-growing file.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Processor wait for a fresh notification before re-checking the stop
    /// flag.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Attempts without file growth before a report is abandoned.
    #[serde(default = "default_stale_attempt_ceiling")]
    pub stale_attempt_ceiling: u32,

    /// Handoff queue bound; `None` means unbounded.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: Option<usize>,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

fn default_scan_interval_ms() -> u64 {
    100
}

fn default_retry_interval_ms() -> u64 {
    300
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_stale_attempt_ceiling() -> u32 {
    100
}

fn default_queue_capacity() -> Option<usize> {
    Some(1024)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            parse_out_of_date: false,
            build_start: Utc::now(),
            scan_interval_ms: default_scan_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            stale_attempt_ceiling: default_stale_attempt_ceiling(),
            queue_capacity: default_queue_capacity(),
            targets: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig =
            toml::from_str(&content).map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.scan_interval_ms, 100);
        assert_eq!(config.retry_interval_ms, 300);
        assert_eq!(config.poll_timeout_ms, 500);
        assert_eq!(config.stale_attempt_ceiling, 100);
        assert_eq!(config.queue_capacity, Some(1024));
        assert!(!config.parse_out_of_date);
    }

    #[test]
    fn toml_round_trip() {
        let toml_str = r#"
verbose = true
stale_attempt_ceiling = 5

[[targets]]
kind = "junit"
path = "build/reports/**/*.xml"

[[targets]]
kind = "pmd"
path = "build/pmd.xml"
"#;
        let config: PipelineConfig = toml::from_str(toml_str).unwrap();
        assert!(config.verbose);
        assert_eq!(config.stale_attempt_ceiling, 5);
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].kind, ReportKind::Junit);
        assert_eq!(config.targets[1].kind, ReportKind::Pmd);
        // Unset knobs keep their defaults.
        assert_eq!(config.scan_interval_ms, 100);
    }
}
