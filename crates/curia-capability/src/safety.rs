//! Dangerous-statement blocklist.
//!
//! Case-insensitive substring matching over tool-call argument strings,
//! built on an Aho-Corasick automaton so one pass covers every configured
//! pattern.  Used on both sides of the wire: the orchestrator's pre-dispatch
//! filter chain and the capability server's own defense.

use aho_corasick::AhoCorasick;
use serde_json::Value;

/// Compiled dangerous-pattern matcher.
#[derive(Debug)]
pub struct StatementBlocklist {
    patterns: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl StatementBlocklist {
    /// Compile a blocklist from configured patterns.  Matching is
    /// case-insensitive.
    #[must_use]
    pub fn new(patterns: Vec<String>) -> Self {
        let automaton = if patterns.is_empty() {
            None
        } else {
            AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(&patterns)
                .ok()
        };
        Self {
            patterns,
            automaton,
        }
    }

    /// The default data-destructive pattern set.
    #[must_use]
    pub fn default_patterns() -> Vec<String> {
        [
            "DROP TABLE",
            "DELETE FROM",
            "TRUNCATE",
            "ALTER TABLE",
            "CREATE USER",
            "GRANT ",
            "REVOKE ",
            "SHUTDOWN",
        ]
        .into_iter()
        .map(str::to_owned)
        .collect()
    }

    /// The first configured pattern found in `text`, if any.
    #[must_use]
    pub fn find_match(&self, text: &str) -> Option<&str> {
        let automaton = self.automaton.as_ref()?;
        automaton
            .find(text)
            .map(|m| self.patterns[m.pattern().as_usize()].as_str())
    }

    /// Scan every string value in an argument object (recursively) and
    /// return the first matched pattern.
    #[must_use]
    pub fn scan_arguments(&self, arguments: &Value) -> Option<&str> {
        match arguments {
            Value::String(s) => self.find_match(s),
            Value::Array(items) => items.iter().find_map(|v| self.scan_arguments(v)),
            Value::Object(map) => map.values().find_map(|v| self.scan_arguments(v)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
