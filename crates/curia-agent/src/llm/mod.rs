//! LLM chat client and wire types.

pub mod client;
pub mod types;

pub use client::{ChatBackend, ChatClientConfig, OpenAiChatClient};
pub use types::{
    ChatMessage, ChatReply, ChatRequest, ChatToolSpec, FunctionCall, ToolCall, ToolCallRequest,
    ToolFunction,
};
