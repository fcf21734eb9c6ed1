//! Pre-dispatch safety and budget filters.
//!
//! Applied per assistant turn, in declared order:
//!
//! 1. **Statement blocklist** -- any string argument matching a configured
//!    dangerous pattern rejects that call with reason `unsafe_payload`.
//!    Only the offending call is blocked; the rest of the turn dispatches.
//! 2. **Token budget** -- argument sizes are estimated with the chars/4
//!    heuristic; when the turn's pending calls exceed the configured
//!    ceiling, the single largest string argument is truncated in place
//!    with an explicit `"...[truncated]"` marker.  The call still
//!    dispatches, flagged as truncated.

use serde_json::Value;

use curia_capability::StatementBlocklist;

use crate::llm::types::ToolCall;

/// Marker appended to truncated argument strings.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Per-call verdict from the filter chain, index-aligned with the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// The call may dispatch; `truncated` notes a budget truncation.
    Allow {
        /// Whether an argument was truncated.
        truncated: bool,
    },
    /// The call is rejected and must not dispatch.
    Reject {
        /// Machine-readable reason (`"unsafe_payload: ..."`).
        reason: String,
    },
}

/// The ordered filter chain.
pub struct FilterChain {
    blocklist: StatementBlocklist,
    token_budget_chars: usize,
}

impl FilterChain {
    /// Build a chain from the configured dangerous patterns and budget.
    #[must_use]
    pub fn new(dangerous_patterns: Vec<String>, token_budget_chars: usize) -> Self {
        Self {
            blocklist: StatementBlocklist::new(dangerous_patterns),
            token_budget_chars,
        }
    }

    /// Apply every filter to the turn's calls, mutating arguments where
    /// the budget requires it.
    pub fn apply(&self, calls: &mut [ToolCall]) -> Vec<FilterDecision> {
        let mut decisions: Vec<FilterDecision> = calls
            .iter()
            .map(|call| match self.blocklist.scan_arguments(&call.arguments) {
                Some(pattern) => {
                    tracing::warn!(
                        tool = %call.name,
                        pattern = %pattern,
                        "rejecting tool call with dangerous payload"
                    );
                    FilterDecision::Reject {
                        reason: format!("unsafe_payload: blocked pattern `{pattern}`"),
                    }
                }
                None => FilterDecision::Allow { truncated: false },
            })
            .collect();

        self.apply_budget(calls, &mut decisions);
        decisions
    }

    /// Enforce the token budget over the calls that passed the blocklist.
    fn apply_budget(&self, calls: &mut [ToolCall], decisions: &mut [FilterDecision]) {
        let total_chars: usize = calls
            .iter()
            .zip(decisions.iter())
            .filter(|(_, d)| matches!(d, FilterDecision::Allow { .. }))
            .map(|(c, _)| argument_chars(&c.arguments))
            .sum();

        // chars/4 estimates tokens; the ceiling is expressed in chars.
        if total_chars <= self.token_budget_chars {
            return;
        }
        let overflow = total_chars - self.token_budget_chars;

        // Find the single largest string argument across pending calls.
        let mut largest: Option<(usize, Vec<String>, usize)> = None; // (call idx, path, len)
        for (index, (call, decision)) in calls.iter().zip(decisions.iter()).enumerate() {
            if !matches!(decision, FilterDecision::Allow { .. }) {
                continue;
            }
            if let Some((path, len)) = largest_string(&call.arguments) {
                if largest.as_ref().is_none_or(|(_, _, l)| len > *l) {
                    largest = Some((index, path, len));
                }
            }
        }

        let Some((index, path, len)) = largest else {
            return;
        };

        let keep = len.saturating_sub(overflow);
        let truncated = match value_at_path_mut(&mut calls[index].arguments, &path) {
            Some(Value::String(s)) => {
                let mut cut = keep.min(s.len());
                // Stay on a char boundary.
                while cut > 0 && !s.is_char_boundary(cut) {
                    cut -= 1;
                }
                s.truncate(cut);
                s.push_str(TRUNCATION_MARKER);
                true
            }
            _ => false,
        };

        if truncated {
            tracing::warn!(
                tool = %calls[index].name,
                estimated_tokens = total_chars / 4,
                budget_tokens = self.token_budget_chars / 4,
                "token budget exceeded, truncated largest argument"
            );
            decisions[index] = FilterDecision::Allow { truncated: true };
        }
    }
}

/// Serialized character count of an argument object.
fn argument_chars(arguments: &Value) -> usize {
    serde_json::to_string(arguments).map(|s| s.len()).unwrap_or(0)
}

/// Locate the longest string value in an argument object, returning its
/// key path and length.
fn largest_string(arguments: &Value) -> Option<(Vec<String>, usize)> {
    fn walk(value: &Value, path: &mut Vec<String>, best: &mut Option<(Vec<String>, usize)>) {
        match value {
            Value::String(s) => {
                if best.as_ref().is_none_or(|(_, len)| s.len() > *len) {
                    *best = Some((path.clone(), s.len()));
                }
            }
            Value::Object(map) => {
                for (key, child) in map {
                    path.push(key.clone());
                    walk(child, path, best);
                    path.pop();
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    path.push(i.to_string());
                    walk(child, path, best);
                    path.pop();
                }
            }
            _ => {}
        }
    }

    let mut best = None;
    walk(arguments, &mut Vec::new(), &mut best);
    best
}

/// Mutable access to a value by the path produced by [`largest_string`].
fn value_at_path_mut<'a>(value: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
