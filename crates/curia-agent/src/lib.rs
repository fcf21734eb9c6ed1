//! Agent runtime for Curia.
//!
//! Implements the run-until-done planner that drives the assistant: the
//! loop asks the LLM what to do, executes the selected tools against the
//! correct capability servers, feeds a summary of the results back, and
//! terminates with a final answer, a timeout apology, or a failure
//! apology.
//!
//! ## Modules
//!
//! - [`llm`] -- chat wire types, the [`ChatBackend`] seam, and the
//!   HTTP chat-completions client.
//! - [`orchestrator`] -- the bounded loop and its outcome types.
//! - [`filters`] -- pre-dispatch safety and token-budget filters.
//! - [`summary`] -- execution records and the results summary the model
//!   reads.
//! - [`error`] -- agent error types.

pub mod error;
pub mod filters;
pub mod llm;
pub mod orchestrator;
pub mod summary;

pub use error::{AgentError, Result};
pub use filters::{FilterChain, FilterDecision, TRUNCATION_MARKER};
pub use llm::{
    ChatBackend, ChatClientConfig, ChatMessage, ChatReply, ChatRequest, ChatToolSpec,
    OpenAiChatClient, ToolCall, ToolCallRequest,
};
pub use orchestrator::{
    DEFAULT_SYSTEM_PROMPT, ExecutionMetadata, FINAL_ANSWER_DIRECTIVE, HistoryTurn, Orchestrator,
    OrchestratorConfig, OrchestratorOutcome, Phase,
};
pub use summary::{ExecutionRecord, render_summary};
