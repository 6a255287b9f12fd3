//! Brain configuration: scheduler cadence, timeout circuit breaker, tool
//! chain cap, dispatch deadlines, and the security pre-check pattern list.
//!
//! Loaded from a TOML file when one exists, otherwise defaults. Every field
//! has a serde default so a partial file is fine.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to.
    #[serde(default = "d_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: d_bind() }
    }
}

/// Event-loop cadence and the timeout circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between full scan passes.
    #[serde(default = "d_1")]
    pub scan_interval_secs: u64,
    /// Hard timeout before an event is force-closed (45 min).
    #[serde(default = "d_2700")]
    pub max_event_duration_secs: u64,
    /// An agent-result turn newer than this grants the grace extension.
    #[serde(default = "d_60")]
    pub grace_secs: u64,
    /// Extra time granted while within grace.
    #[serde(default = "d_120")]
    pub grace_extension_secs: u64,
    /// Idle safety net: re-process an event untouched for this long even
    /// with no unread turns.
    #[serde(default = "d_240")]
    pub idle_reprocess_secs: u64,
    /// Cadence of the last-ditch cleanup sub-task.
    #[serde(default = "d_300")]
    pub cleanup_interval_secs: u64,
    /// Absolute age ceiling enforced by the cleanup sub-task regardless of
    /// activity.
    #[serde(default = "d_7200")]
    pub hard_ceiling_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: d_1(),
            max_event_duration_secs: d_2700(),
            grace_secs: d_60(),
            grace_extension_secs: d_120(),
            idle_reprocess_secs: d_240(),
            cleanup_interval_secs: d_300(),
            hard_ceiling_secs: d_7200(),
        }
    }
}

/// Per-event LLM processing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Tool-call chain cap per LLM send.
    #[serde(default = "d_8")]
    pub max_tool_chains: u32,
    /// Defer duration after a retryable agent error.
    #[serde(default = "d_300")]
    pub retry_defer_secs: u64,
    /// Defer duration after both the chat stream and the stateless fallback
    /// fail.
    #[serde(default = "d_60")]
    pub stream_failure_defer_secs: u64,
    #[serde(default = "d_temp")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_tool_chains: d_8(),
            retry_defer_secs: d_300(),
            stream_failure_defer_secs: d_60(),
            temperature: d_temp(),
            max_tokens: None,
        }
    }
}

/// Dispatch deadlines and the forbidden-pattern pre-check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-task deadline for agent round-trips (10 min).
    #[serde(default = "d_600")]
    pub timeout_secs: u64,
    /// Deadline for implement-mode developer tasks (15 min).
    #[serde(default = "d_900")]
    pub implement_timeout_secs: u64,
    /// How long to wait for a worker of the requested role to free up
    /// before failing with agent-unavailable.
    #[serde(default = "d_5")]
    pub availability_wait_secs: u64,
    /// Prompts matching any of these patterns are refused before any I/O.
    /// Empty means "use the built-in list".
    #[serde(default)]
    pub forbidden_patterns: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_600(),
            implement_timeout_secs: d_900(),
            availability_wait_secs: d_5(),
            forbidden_patterns: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top level
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrainConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl BrainConfig {
    /// Load from a TOML file, or defaults when `path` is `None` or missing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.scheduler.scan_interval_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "scheduler.scan_interval_secs".into(),
                message: "must be at least 1 (the scheduler would spin)".into(),
            });
        }
        if self.scheduler.max_event_duration_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "scheduler.max_event_duration_secs".into(),
                message: "must be non-zero".into(),
            });
        }
        if self.scheduler.hard_ceiling_secs < self.scheduler.max_event_duration_secs {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "scheduler.hard_ceiling_secs".into(),
                message: "below max_event_duration_secs; the cleanup sub-task will \
                          close events before the circuit breaker sees them"
                    .into(),
            });
        }
        if self.processor.max_tool_chains == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "processor.max_tool_chains".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.dispatch.implement_timeout_secs < self.dispatch.timeout_secs {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "dispatch.implement_timeout_secs".into(),
                message: "shorter than the default dispatch timeout".into(),
            });
        }
        for pattern in &self.dispatch.forbidden_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "dispatch.forbidden_patterns".into(),
                    message: format!("invalid pattern {pattern:?}: {e}"),
                });
            }
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_bind() -> String {
    "127.0.0.1:8787".to_string()
}
fn d_1() -> u64 {
    1
}
fn d_5() -> u64 {
    5
}
fn d_8() -> u32 {
    8
}
fn d_60() -> u64 {
    60
}
fn d_120() -> u64 {
    120
}
fn d_240() -> u64 {
    240
}
fn d_300() -> u64 {
    300
}
fn d_600() -> u64 {
    600
}
fn d_900() -> u64 {
    900
}
fn d_2700() -> u64 {
    2700
}
fn d_7200() -> u64 {
    7200
}
fn d_temp() -> f32 {
    0.2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = BrainConfig::default();
        assert_eq!(cfg.scheduler.scan_interval_secs, 1);
        assert_eq!(cfg.scheduler.max_event_duration_secs, 2700);
        assert_eq!(cfg.scheduler.grace_secs, 60);
        assert_eq!(cfg.scheduler.grace_extension_secs, 120);
        assert_eq!(cfg.scheduler.idle_reprocess_secs, 240);
        assert_eq!(cfg.processor.max_tool_chains, 8);
        assert_eq!(cfg.dispatch.timeout_secs, 600);
        assert_eq!(cfg.dispatch.implement_timeout_secs, 900);
    }

    #[test]
    fn defaults_validate_cleanly() {
        assert!(BrainConfig::default().validate().is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: BrainConfig = toml::from_str(
            r#"
            [scheduler]
            max_event_duration_secs = 900
            "#,
        )
        .unwrap();
        assert_eq!(cfg.scheduler.max_event_duration_secs, 900);
        assert_eq!(cfg.scheduler.scan_interval_secs, 1);
        assert_eq!(cfg.processor.max_tool_chains, 8);
    }

    #[test]
    fn zero_scan_interval_is_an_error() {
        let mut cfg = BrainConfig::default();
        cfg.scheduler.scan_interval_secs = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error
                && i.field == "scheduler.scan_interval_secs"));
    }

    #[test]
    fn bad_forbidden_pattern_is_an_error() {
        let mut cfg = BrainConfig::default();
        cfg.dispatch.forbidden_patterns.push("([unclosed".into());
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn low_hard_ceiling_warns() {
        let mut cfg = BrainConfig::default();
        cfg.scheduler.hard_ceiling_secs = 100;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let cfg = BrainConfig::load(Some(Path::new("/nonexistent/brain.toml"))).unwrap();
        assert_eq!(cfg.scheduler.scan_interval_secs, 1);
    }
}
