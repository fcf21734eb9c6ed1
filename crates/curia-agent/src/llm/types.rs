//! Chat wire types.
//!
//! These model the data flowing between the orchestration loop and the
//! chat-completions API.  The message log is a discriminated union tagged
//! by `role`, matching the wire format directly, so the log serializes
//! verbatim into the request body.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Message log
// ---------------------------------------------------------------------------

/// One entry in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    /// System-level instructions that shape model behavior.
    System {
        /// Instruction text.
        content: String,
    },
    /// Input from the caller (or a synthetic directive from the loop).
    User {
        /// Message text.
        content: String,
    },
    /// Output from the LLM.
    Assistant {
        /// Text content; may be absent on pure tool-call replies.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// Tool calls requested by the model.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// Create an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool invocation exactly as emitted by the model.  The `id` must be
/// surfaced unchanged so results can be correlated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Model-assigned call identifier.
    pub id: String,
    /// Always `"function"` for the backends we speak to.
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    /// The requested function and its raw arguments.
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".into()
}

/// The function half of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Prefixed tool name (`"<capability>__<tool>"`).
    pub name: String,
    /// Arguments as the raw JSON string the model produced.
    #[serde(default)]
    pub arguments: String,
}

/// A tool call after argument parsing, ready for dispatch.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Model-assigned call identifier, echoed from the request.
    pub call_id: String,
    /// Prefixed tool name.
    pub name: String,
    /// Parsed argument object.  Malformed JSON degrades to `{}` so a bad
    /// argument blob never aborts the round.
    pub arguments: Value,
}

impl ToolCall {
    /// Parse a raw call, tolerating malformed argument JSON.
    #[must_use]
    pub fn parse(raw: &ToolCallRequest) -> Self {
        let arguments = if raw.function.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&raw.function.arguments).unwrap_or_else(|e| {
                tracing::warn!(
                    tool = %raw.function.name,
                    error = %e,
                    "malformed tool arguments, proceeding with empty object"
                );
                Value::Object(Default::default())
            })
        };

        // Non-object argument payloads are treated the same as malformed.
        let arguments = if arguments.is_object() {
            arguments
        } else {
            Value::Object(Default::default())
        };

        Self {
            call_id: raw.id.clone(),
            name: raw.function.name.clone(),
            arguments,
        }
    }
}

// ---------------------------------------------------------------------------
// Tool catalog presentation
// ---------------------------------------------------------------------------

/// One entry of the tool catalog as presented to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatToolSpec {
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub spec_type: String,
    /// The function definition.
    pub function: ToolFunction,
}

/// Function definition inside a [`ChatToolSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    /// Prefixed tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON-schema parameter object.
    pub parameters: Value,
}

impl ChatToolSpec {
    /// Build a spec from catalog fields.
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            spec_type: "function".into(),
            function: ToolFunction {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Request / reply
// ---------------------------------------------------------------------------

/// A full chat-completions request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// The conversation log.
    pub messages: Vec<ChatMessage>,
    /// Tool catalog, omitted when empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ChatToolSpec>,
    /// Tool choice policy; `"auto"` whenever tools are present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// The assistant message extracted from `choices[0].message`.
#[derive(Debug, Clone, Default)]
pub struct ChatReply {
    /// Text content, if any.
    pub content: Option<String>,
    /// Tool calls, if any, in emission order.
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatReply {
    /// Whether the reply carries usable text.
    #[must_use]
    pub fn has_text(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_with_role_tag() {
        let msg = ChatMessage::system("be helpful");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "be helpful");
    }

    #[test]
    fn assistant_without_tool_calls_omits_field() {
        let msg = ChatMessage::assistant("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn tool_call_arguments_parse() {
        let raw = ToolCallRequest {
            id: "call_1".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "sales__query_sql".into(),
                arguments: r#"{"query":"SELECT 1"}"#.into(),
            },
        };
        let call = ToolCall::parse(&raw);
        assert_eq!(call.call_id, "call_1");
        assert_eq!(call.arguments["query"], "SELECT 1");
    }

    #[test]
    fn malformed_arguments_degrade_to_empty_object() {
        let raw = ToolCallRequest {
            id: "call_2".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "sales__query_sql".into(),
                arguments: "{not json".into(),
            },
        };
        let call = ToolCall::parse(&raw);
        assert_eq!(call.arguments, serde_json::json!({}));
    }

    #[test]
    fn non_object_arguments_degrade_to_empty_object() {
        let raw = ToolCallRequest {
            id: "call_3".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "sales__query_sql".into(),
                arguments: r#"[1, 2, 3]"#.into(),
            },
        };
        let call = ToolCall::parse(&raw);
        assert_eq!(call.arguments, serde_json::json!({}));
    }

    #[test]
    fn request_omits_empty_tools() {
        let request = ChatRequest {
            model: "gpt-test".into(),
            messages: vec![ChatMessage::user("hi")],
            tools: vec![],
            tool_choice: None,
            temperature: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn reply_text_detection() {
        let empty = ChatReply::default();
        assert!(!empty.has_text());

        let blank = ChatReply {
            content: Some("   ".into()),
            tool_calls: vec![],
        };
        assert!(!blank.has_text());

        let text = ChatReply {
            content: Some("answer".into()),
            tool_calls: vec![],
        };
        assert!(text.has_text());
    }
}
