//! Dispatch security pre-check.
//!
//! Prompts headed to agent sidecars are scanned against a forbidden-pattern
//! list before any I/O. The patterns target destructive operations a
//! reasoning loop must never be able to hand to a CLI-backed worker, no
//! matter what the LLM asked for.

use regex::RegexSet;

use brain_domain::{Error, Result};

/// Built-in forbidden patterns, used when the config does not supply its own.
pub fn default_patterns() -> Vec<String> {
    [
        r"(?i)rm\s+(-[a-z]*[rf][a-z]*\s+)+/",
        r"(?i)\bmkfs(\.[a-z0-9]+)?\b",
        r"(?i)\bdd\b.*\bof=/dev/",
        r"(?i)git\s+push\s+(--force|-f)\b",
        r"(?i)kubectl\s+delete\s+(ns|namespace)\b",
        r"(?i)\bdrop\s+(database|table)\b",
        r"(?i)\btruncate\s+table\b",
        r"(?i)terraform\s+destroy\b",
        r"(?i)aws\s+ec2\s+terminate-instances\b",
        r"(?i)\bshutdown\b\s+(-h|now)",
        r":\(\)\s*\{.*\};\s*:",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Compiled forbidden-pattern set. Built once at startup.
pub struct PromptGuard {
    set: RegexSet,
    patterns: Vec<String>,
}

impl PromptGuard {
    /// Compile from config patterns, falling back to the built-in list when
    /// the config supplies none.
    pub fn from_patterns(patterns: &[String]) -> Result<Self> {
        let patterns = if patterns.is_empty() {
            default_patterns()
        } else {
            patterns.to_vec()
        };
        let set = RegexSet::new(&patterns)
            .map_err(|e| Error::Config(format!("forbidden_patterns: {e}")))?;
        Ok(Self { set, patterns })
    }

    /// Scan a prompt. Returns `SecurityBlocked` naming the first matching
    /// pattern.
    pub fn check(&self, prompt: &str) -> Result<()> {
        if let Some(idx) = self.set.matches(prompt).iter().next() {
            let pattern = &self.patterns[idx];
            tracing::warn!(pattern = %pattern, "prompt refused by security pre-check");
            return Err(Error::SecurityBlocked(format!(
                "prompt matches forbidden pattern {pattern:?}"
            )));
        }
        Ok(())
    }
}
