//! Execution records and the results summary injected back to the LLM.
//!
//! The summary is the only way the model sees tool outputs: after each
//! dispatch the loop appends an assistant message rendering every record
//! of the turn, followed by a user directive asking for the final answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use curia_capability::ExecutionResult;

// ---------------------------------------------------------------------------
// Execution record
// ---------------------------------------------------------------------------

/// The outcome of one tool call, kept for the summary, the persisted turn,
/// and observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Owning capability.
    pub capability: String,
    /// Unprefixed tool name.
    pub tool: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Rows produced.
    pub row_count: u64,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration of the call in milliseconds.
    pub duration_ms: u64,
    /// Small sample of result rows.
    #[serde(default)]
    pub sample_rows: Vec<Value>,
    /// Whether the budget filter truncated an argument before dispatch.
    #[serde(default)]
    pub truncated: bool,
}

impl ExecutionRecord {
    /// Build a record from a capability server's result envelope.
    #[must_use]
    pub fn from_result(
        capability: &str,
        tool: &str,
        result: &ExecutionResult,
        duration_ms: u64,
        truncated: bool,
    ) -> Self {
        Self {
            capability: capability.to_owned(),
            tool: tool.to_owned(),
            success: result.success,
            row_count: result.row_count,
            error: result.error.clone(),
            duration_ms,
            sample_rows: result.sample_rows.clone().unwrap_or_default(),
            truncated,
        }
    }

    /// A record for a call that failed before or during dispatch.
    pub fn failure(
        capability: &str,
        tool: &str,
        reason: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            capability: capability.to_owned(),
            tool: tool.to_owned(),
            success: false,
            row_count: 0,
            error: Some(reason.into()),
            duration_ms,
            sample_rows: Vec::new(),
            truncated: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Summary rendering
// ---------------------------------------------------------------------------

/// Render the turn's records as the Markdown summary the LLM reads.
/// Samples are capped at `sample_limit` rows per record.
#[must_use]
pub fn render_summary(records: &[ExecutionRecord], sample_limit: usize) -> String {
    let mut lines = vec!["### Tool Execution Results".to_owned(), String::new()];

    for record in records {
        lines.push(format!(
            "**Tool**: `{}` (capability: `{}`)",
            record.tool, record.capability
        ));

        if record.success {
            lines.push("  - Status: Success".to_owned());
            lines.push(format!("  - Rows: {}", record.row_count));
            if !record.sample_rows.is_empty() {
                let sample: Vec<&Value> =
                    record.sample_rows.iter().take(sample_limit).collect();
                lines.push(format!(
                    "  - Sample: {}",
                    serde_json::to_string(&sample).unwrap_or_else(|_| "[]".into())
                ));
            }
        } else {
            lines.push("  - Status: Failed".to_owned());
            lines.push(format!(
                "  - Error: {}",
                record.error.as_deref().unwrap_or("unknown error")
            ));
        }

        if record.truncated {
            lines.push("  - Note: arguments were truncated to fit the token budget".to_owned());
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
