//! Severity classification for intercepted output.
//!
//! The policy is pluggable through [`LevelClassifier`]. The default,
//! [`MarkerClassifier`], looks for a conventional severity marker at the very
//! start of the text, case-insensitively, optionally wrapped in a bracket:
//!
//! | Marker                        | Severity |
//! |-------------------------------|----------|
//! | `critical`, `crit`, `fatal`   | Critical |
//! | `error`, `err`, `e:`          | Error    |
//! | `warning`, `warn`             | Warning  |
//! | `info`                        | Info     |
//! | `debug`, `trace`              | Debug    |
//!
//! A marker must end at a word boundary, so `errors were found` and
//! `information` carry no marker. Text without a marker is left to the
//! caller's default severity.

use crate::record::Severity;
use once_cell::sync::Lazy;
use regex::Regex;

/// Decides which severity a piece of captured text should be logged at.
pub trait LevelClassifier: Send + Sync {
    /// Returns `None` when the text carries no severity marker.
    fn classify(&self, text: &str) -> Option<Severity>;
}

const LEADING: &str = r"(?i)^\s*[\[(<{]?\s*";

static BUILTIN_RULES: Lazy<Vec<(Regex, Severity)>> = Lazy::new(|| {
    [
        (r"(?:critical|crit|fatal)\b", Severity::Critical),
        (r"(?:error|err)\b", Severity::Error),
        (r"e:", Severity::Error),
        (r"(?:warning|warn)\b", Severity::Warning),
        (r"info\b", Severity::Info),
        (r"(?:debug|trace)\b", Severity::Debug),
    ]
    .into_iter()
    .filter_map(|(tokens, severity)| {
        Regex::new(&format!("{LEADING}{tokens}"))
            .ok()
            .map(|re| (re, severity))
    })
    .collect()
});

/// Classifier that matches leading severity markers, plus any custom rules.
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    /// Checked in order before the built-in markers
    custom: Vec<(Regex, Severity)>,
}

impl MarkerClassifier {
    pub fn new() -> Self {
        Self { custom: Vec::new() }
    }

    /// Add a rule checked before the built-in markers (and before rules
    /// added earlier).
    pub fn with_rule(mut self, pattern: &str, severity: Severity) -> Result<Self, regex::Error> {
        let re = Regex::new(pattern)?;
        self.custom.insert(0, (re, severity));
        Ok(self)
    }
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelClassifier for MarkerClassifier {
    fn classify(&self, text: &str) -> Option<Severity> {
        self.custom
            .iter()
            .chain(BUILTIN_RULES.iter())
            .find(|(re, _)| re.is_match(text))
            .map(|(_, severity)| *severity)
    }
}
