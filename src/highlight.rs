//! Keyword highlight matching.
//!
//! Keywords are written in `/pattern/flags` form, with `flags` drawn from
//! `gimuy`. Only `i` (case-insensitive) and `m` (multi-line) change matching
//! here; `g`, `u` and `y` are accepted for compatibility and are no-ops for
//! a boolean match. Matching time is bounded by the regex engine itself,
//! which does not backtrack.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::error::AppError;

static SPEC_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(.+)/([gimuy]*)$").unwrap());

/// A precompiled set of highlight predicates.
///
/// Invariant: `sources` and `patterns` are index-aligned and always the same
/// length. [`HighlightMatcher::add_keyword`] is atomic: a rejected spec
/// changes neither list.
#[derive(Debug, Default)]
pub struct HighlightMatcher {
    sources: Vec<String>,
    patterns: Vec<Regex>,
}

impl HighlightMatcher {
    /// Compile an initial keyword list. The first failing spec rejects the
    /// whole construction; no partially-initialized matcher escapes.
    pub fn new(keywords: &[String]) -> Result<Self, AppError> {
        let mut matcher = Self::default();
        for spec in keywords {
            matcher.add_keyword(spec)?;
        }
        Ok(matcher)
    }

    /// Compile `spec` and append it. On failure neither the source list nor
    /// the compiled list changes.
    pub fn add_keyword(&mut self, spec: &str) -> Result<(), AppError> {
        let caps = SPEC_SHAPE
            .captures(spec)
            .ok_or_else(|| AppError::BadKeyword("must be in /pattern/flags form".into()))?;
        let (pattern, flags) = (&caps[1], &caps[2]);

        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .build()
            .map_err(|e| AppError::BadKeyword(format!("compile failed: {e}")))?;

        self.sources.push(spec.to_string());
        self.patterns.push(compiled);
        Ok(())
    }

    /// Remove one occurrence of `spec`. Returns whether anything was removed.
    pub fn remove_keyword(&mut self, spec: &str) -> bool {
        match self.sources.iter().position(|s| s == spec) {
            Some(i) => {
                self.sources.remove(i);
                self.patterns.remove(i);
                true
            }
            None => false,
        }
    }

    /// Defensive copy of the keyword sources, in insertion order.
    pub fn keywords(&self) -> Vec<String> {
        self.sources.clone()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// True if any compiled predicate matches `text`. Short-circuits on the
    /// first hit.
    pub fn matches_any(&self, text: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pattern_with_flags() {
        let mut m = HighlightMatcher::default();
        m.add_keyword("/php/i").unwrap();
        assert_eq!(m.keywords(), vec!["/php/i".to_string()]);
        assert!(m.matches_any("some PHP code"));
        assert!(!m.matches_any("rust only"));
    }

    #[test]
    fn case_sensitive_without_i_flag() {
        let m = HighlightMatcher::new(&["/php/".into()]).unwrap();
        assert!(m.matches_any("php"));
        assert!(!m.matches_any("PHP"));
    }

    #[test]
    fn rejects_bare_pattern() {
        let mut m = HighlightMatcher::default();
        let err = m.add_keyword("php").unwrap_err();
        assert!(err.to_string().contains("/pattern/flags"));
    }

    #[test]
    fn rejects_unknown_flags() {
        let mut m = HighlightMatcher::default();
        assert!(m.add_keyword("/php/x").is_err());
    }

    #[test]
    fn invalid_pattern_leaves_lists_unchanged() {
        let mut m = HighlightMatcher::new(&["/ok/".into()]).unwrap();
        let err = m.add_keyword("/(unclosed/").unwrap_err();
        assert!(err.to_string().contains("compile failed"));
        assert_eq!(m.keywords(), vec!["/ok/".to_string()]);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn constructor_rejects_whole_list_on_first_bad_spec() {
        let result = HighlightMatcher::new(&["/ok/".into(), "bad".into()]);
        assert!(result.is_err());
    }

    #[test]
    fn remove_keyword_removes_one_occurrence() {
        let mut m =
            HighlightMatcher::new(&["/a/".into(), "/b/".into(), "/a/".into()]).unwrap();
        assert!(m.remove_keyword("/a/"));
        assert_eq!(m.keywords(), vec!["/b/".to_string(), "/a/".to_string()]);
        assert!(m.matches_any("a"));
        assert!(!m.remove_keyword("/missing/"));
    }

    #[test]
    fn matches_any_on_empty_matcher_is_false() {
        let m = HighlightMatcher::default();
        assert!(!m.matches_any("anything"));
    }

    #[test]
    fn multi_line_flag_anchors_per_line() {
        let m = HighlightMatcher::new(&["/^php$/m".into()]).unwrap();
        assert!(m.matches_any("hello\nphp\nworld"));
    }

    #[test]
    fn pattern_may_contain_slashes() {
        let m = HighlightMatcher::new(&["/a\\/b/".into()]).unwrap();
        assert!(m.matches_any("a/b"));
    }
}
