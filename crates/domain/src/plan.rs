//! Plan step frontmatter.
//!
//! A turn's `plan` payload may open with a `---`-delimited YAML block carrying
//! step metadata, e.g.:
//!
//! ```text
//! ---
//! step: 2
//! total: 5
//! owner: sysadmin
//! ---
//! Restart the ingest workers one at a time.
//! ```
//!
//! Parsing is total: anything that is not a well-formed frontmatter block is
//! returned as plain body text.

use serde::{Deserialize, Serialize};

/// Step metadata extracted from a plan's frontmatter block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanMeta {
    pub step: u32,
    #[serde(default)]
    pub total: Option<u32>,
    #[serde(default)]
    pub owner: Option<String>,
}

/// Split a plan payload into optional frontmatter metadata and body text.
pub fn parse_plan(text: &str) -> (Option<PlanMeta>, &str) {
    let Some(rest) = text.strip_prefix("---") else {
        return (None, text);
    };
    // The opening fence must be alone on its line.
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return (None, text);
    };
    let Some(end) = rest.find("\n---") else {
        return (None, text);
    };
    let (block, tail) = rest.split_at(end);
    // Skip "\n---" and the line break after the closing fence, if present.
    let body = tail[4..].trim_start_matches('\r');
    let body = body.strip_prefix('\n').unwrap_or(body);

    match serde_yaml::from_str::<PlanMeta>(block) {
        Ok(meta) => (Some(meta), body),
        Err(_) => (None, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_frontmatter() {
        let text = "---\nstep: 2\ntotal: 5\nowner: sysadmin\n---\nRestart the workers.";
        let (meta, body) = parse_plan(text);
        assert_eq!(
            meta,
            Some(PlanMeta {
                step: 2,
                total: Some(5),
                owner: Some("sysadmin".into()),
            })
        );
        assert_eq!(body, "Restart the workers.");
    }

    #[test]
    fn step_only_is_enough() {
        let (meta, body) = parse_plan("---\nstep: 1\n---\ndo the thing");
        assert_eq!(meta.unwrap().step, 1);
        assert_eq!(body, "do the thing");
    }

    #[test]
    fn plain_text_passes_through() {
        let (meta, body) = parse_plan("just a plan, no metadata");
        assert!(meta.is_none());
        assert_eq!(body, "just a plan, no metadata");
    }

    #[test]
    fn malformed_yaml_falls_back_to_body() {
        let text = "---\nstep: [not a number\n---\nbody";
        let (meta, body) = parse_plan(text);
        assert!(meta.is_none());
        assert_eq!(body, text);
    }

    #[test]
    fn missing_closing_fence_is_body() {
        let text = "---\nstep: 1\nno closing fence";
        let (meta, body) = parse_plan(text);
        assert!(meta.is_none());
        assert_eq!(body, text);
    }

    #[test]
    fn dashes_inline_are_not_frontmatter() {
        let text = "--- not a fence, just dashes";
        let (meta, body) = parse_plan(text);
        assert!(meta.is_none());
        assert_eq!(body, text);
    }

    #[test]
    fn empty_body_after_frontmatter() {
        let (meta, body) = parse_plan("---\nstep: 3\n---\n");
        assert_eq!(meta.unwrap().step, 3);
        assert_eq!(body, "");
    }
}
