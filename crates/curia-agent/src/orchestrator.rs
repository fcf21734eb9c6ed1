//! The bounded tool-calling loop.
//!
//! Transforms one user message into a final assistant answer by
//! interleaving LLM planning with capability tool executions:
//!
//! ```text
//! DISCOVER -> PLAN -> (DISPATCH -> INJECT -> PLAN)* -> DONE
//!                                            |          |
//!                                            +-> TIMEOUT/FAILED
//! ```
//!
//! The round counter increments on every PLAN entry; crossing `max_rounds`
//! before DONE yields TIMEOUT.  Within one assistant turn, tool calls run
//! in parallel under a bounded fan-out, and their records are collated in
//! the model's emission order.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use curia_auth::RbacContext;
use curia_capability::protocol::INVALID_PARAMS;
use curia_capability::{CapabilityError, CapabilityLoader, StatementBlocklist, ToolCatalog};

use crate::filters::{FilterChain, FilterDecision};
use crate::llm::types::{ChatMessage, ChatRequest, ChatToolSpec, ToolCall};
use crate::llm::client::ChatBackend;
use crate::summary::{ExecutionRecord, render_summary};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The synthetic directive injected after each results summary.
pub const FINAL_ANSWER_DIRECTIVE: &str =
    "Using the information above, provide the final answer.";

/// Default system prompt for the planner.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an intelligent orchestrator for a business data assistant.

You have access to tools provided by domain capability servers. Use them to \
answer user questions accurately.

When the user asks a question:
1. Determine which tools you need to call
2. Make the necessary tool calls to gather information
3. Synthesize the results into a natural, helpful response

Always provide accurate, data-driven answers with proper context.";

/// Loop configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Model identifier forwarded to the chat backend.
    pub model: String,
    /// Round budget.
    pub max_rounds: u32,
    /// Fan-out cap for parallel tool dispatch within one turn.
    pub max_parallel_tool_calls: usize,
    /// How many prior turns are spliced into the context.
    pub history_turns: usize,
    /// Rows per record shown in the results summary.
    pub sample_limit: usize,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// System prompt.
    pub system_prompt: String,
    /// Answer returned when the round budget is exhausted.
    pub timeout_apology: String,
    /// Answer returned when the LLM transport fails or the plan is empty.
    pub failure_apology: String,
    /// Dangerous-statement patterns for the pre-dispatch filter.
    pub dangerous_patterns: Vec<String>,
    /// Character ceiling for the per-turn argument budget.
    pub token_budget_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_rounds: 8,
            max_parallel_tool_calls: 4,
            history_turns: 5,
            sample_limit: 3,
            temperature: Some(0.0),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            timeout_apology: "I've processed your request but it required more steps than \
                              I'm allowed to take. Please try asking in a different way."
                .into(),
            failure_apology: "I apologize, but I encountered an error processing your \
                              request."
                .into(),
            dangerous_patterns: StatementBlocklist::default_patterns(),
            token_budget_chars: 16_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Loop states.  `Done`, `Failed`, and `Timeout` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discover,
    Plan,
    Dispatch,
    Inject,
    Done,
    Failed,
    Timeout,
}

/// Counters surfaced in the public response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    /// PLAN entries consumed.
    pub rounds: u32,
    /// Tool calls attempted (dispatched or rejected pre-dispatch).
    pub total_tool_calls: u32,
    /// The round that produced the final answer, when one was reached.
    pub final_round: Option<u32>,
}

/// One prior turn, as spliced into the context.  Tool calls from prior
/// turns are never replayed; only the final texts.
#[derive(Debug, Clone)]
pub struct HistoryTurn {
    /// The user's message.
    pub user: String,
    /// The assistant's final answer.
    pub assistant: String,
}

/// What one orchestration run produced.
#[derive(Debug, Clone)]
pub struct OrchestratorOutcome {
    /// Terminal state of the loop.
    pub phase: Phase,
    /// Whether a real answer was produced.
    pub success: bool,
    /// False for timeout/failure apologies.
    pub final_answer: bool,
    /// The answer (or apology) text.
    pub assistant_message: String,
    /// Every execution record across all rounds, in emission order.
    pub records: Vec<ExecutionRecord>,
    /// Loop counters.
    pub metadata: ExecutionMetadata,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// The run-until-done planner.
pub struct Orchestrator {
    loader: Arc<CapabilityLoader>,
    chat: Arc<dyn ChatBackend>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator over the given loader and chat backend.
    pub fn new(
        loader: Arc<CapabilityLoader>,
        chat: Arc<dyn ChatBackend>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            loader,
            chat,
            config,
        }
    }

    /// Run the loop for one request.
    ///
    /// All failure modes map to an outcome (never an error): the caller
    /// always has an answer or an explicit apology to return.
    pub async fn run(
        &self,
        user_message: &str,
        rbac: &RbacContext,
        capabilities: &[String],
        history: &[HistoryTurn],
    ) -> OrchestratorOutcome {
        // DISCOVER: load clients and build the namespaced catalog.
        tracing::debug!(phase = ?Phase::Discover, capabilities = ?capabilities, "loop start");
        self.loader.load(capabilities);
        let discovered = self.loader.discover(capabilities).await;
        let catalog = ToolCatalog::from_discovered(&discovered);
        tracing::info!(
            caller = %rbac.caller_id,
            tool_count = catalog.len(),
            capabilities = discovered.len(),
            "tool discovery complete"
        );

        let tools: Vec<ChatToolSpec> = catalog
            .tools()
            .iter()
            .map(|t| ChatToolSpec::function(&t.name, &t.description, t.parameters.clone()))
            .collect();

        // Seed the message log: system prompt, recent history, user message.
        let mut messages = vec![ChatMessage::system(&self.config.system_prompt)];
        let recent =
            &history[history.len().saturating_sub(self.config.history_turns)..];
        for turn in recent {
            messages.push(ChatMessage::user(&turn.user));
            messages.push(ChatMessage::assistant(&turn.assistant));
        }
        messages.push(ChatMessage::user(user_message));

        let filters = FilterChain::new(
            self.config.dangerous_patterns.clone(),
            self.config.token_budget_chars,
        );

        let mut rounds = 0u32;
        let mut total_tool_calls = 0u32;
        let mut all_records: Vec<ExecutionRecord> = Vec::new();

        loop {
            if rounds >= self.config.max_rounds {
                tracing::warn!(
                    max_rounds = self.config.max_rounds,
                    "round budget exhausted before a final answer"
                );
                return OrchestratorOutcome {
                    phase: Phase::Timeout,
                    success: false,
                    final_answer: false,
                    assistant_message: self.config.timeout_apology.clone(),
                    records: all_records,
                    metadata: ExecutionMetadata {
                        rounds,
                        total_tool_calls,
                        final_round: None,
                    },
                };
            }
            rounds += 1;
            tracing::debug!(phase = ?Phase::Plan, round = rounds, "calling llm");

            let request = ChatRequest {
                model: self.config.model.clone(),
                messages: messages.clone(),
                tool_choice: (!tools.is_empty()).then(|| "auto".to_owned()),
                tools: tools.clone(),
                temperature: self.config.temperature,
            };

            let reply = match self.chat.complete(&request).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!(round = rounds, error = %e, "llm call failed, terminating");
                    return OrchestratorOutcome {
                        phase: Phase::Failed,
                        success: false,
                        final_answer: false,
                        assistant_message: self.config.failure_apology.clone(),
                        records: all_records,
                        metadata: ExecutionMetadata {
                            rounds,
                            total_tool_calls,
                            final_round: None,
                        },
                    };
                }
            };

            if reply.tool_calls.is_empty() {
                if reply.has_text() {
                    let answer = reply.content.unwrap_or_default();
                    tracing::info!(rounds, total_tool_calls, "loop finished with answer");
                    return OrchestratorOutcome {
                        phase: Phase::Done,
                        success: true,
                        final_answer: true,
                        assistant_message: answer,
                        records: all_records,
                        metadata: ExecutionMetadata {
                            rounds,
                            total_tool_calls,
                            final_round: Some(rounds),
                        },
                    };
                }

                tracing::error!(round = rounds, "empty plan: no tool calls and no text");
                return OrchestratorOutcome {
                    phase: Phase::Failed,
                    success: false,
                    final_answer: false,
                    assistant_message: self.config.failure_apology.clone(),
                    records: all_records,
                    metadata: ExecutionMetadata {
                        rounds,
                        total_tool_calls,
                        final_round: None,
                    },
                };
            }

            // DISPATCH: filter, then execute this turn's calls in parallel.
            tracing::debug!(
                phase = ?Phase::Dispatch,
                round = rounds,
                calls = reply.tool_calls.len(),
                "executing tool calls"
            );
            if let Some(text) = reply.content.as_deref().filter(|t| !t.trim().is_empty()) {
                messages.push(ChatMessage::assistant(text));
            }

            let mut calls: Vec<ToolCall> =
                reply.tool_calls.iter().map(ToolCall::parse).collect();
            let decisions = filters.apply(&mut calls);
            let records = self.dispatch(calls, decisions, &catalog, rbac).await;
            total_tool_calls += records.len() as u32;

            // INJECT: summary + synthetic directive, then plan again.
            tracing::debug!(phase = ?Phase::Inject, round = rounds, "injecting results");
            let summary = render_summary(&records, self.config.sample_limit);
            messages.push(ChatMessage::assistant(summary));
            messages.push(ChatMessage::user(FINAL_ANSWER_DIRECTIVE));
            all_records.extend(records);
        }
    }

    /// Execute one turn's calls with the configured fan-out, preserving
    /// emission order in the returned records.  Calls whose prefixed name
    /// is unknown are skipped entirely (logged, never dispatched).
    async fn dispatch(
        &self,
        calls: Vec<ToolCall>,
        decisions: Vec<FilterDecision>,
        catalog: &ToolCatalog,
        rbac: &RbacContext,
    ) -> Vec<ExecutionRecord> {
        let jobs = calls.into_iter().zip(decisions).map(|(call, decision)| {
            async move {
                let (capability, tool) = match catalog.resolve(&call.name) {
                    Some((c, t)) => (c, t),
                    None => {
                        // A rejected call still gets a record even if its
                        // name cannot be resolved; an allowed one is skipped.
                        if let FilterDecision::Reject { reason } = decision {
                            let (c, t) =
                                call.name.split_once("__").unwrap_or((call.name.as_str(), ""));
                            return Some(ExecutionRecord::failure(c, t, reason, 0));
                        }
                        tracing::warn!(
                            tool = %call.name,
                            "tool not in reverse map, skipping call"
                        );
                        return None;
                    }
                };

                match decision {
                    FilterDecision::Reject { reason } => {
                        Some(ExecutionRecord::failure(capability, tool, reason, 0))
                    }
                    FilterDecision::Allow { truncated } => {
                        let Some(client) = self.loader.client(capability) else {
                            tracing::warn!(
                                capability = %capability,
                                "no client loaded for capability, skipping call"
                            );
                            return None;
                        };

                        let started = Instant::now();
                        let result = client
                            .call_tool(tool, call.arguments.clone(), rbac)
                            .await;
                        let duration_ms = started.elapsed().as_millis() as u64;

                        match result {
                            Ok(envelope) => {
                                tracing::info!(
                                    capability = %capability,
                                    tool = %tool,
                                    success = envelope.success,
                                    row_count = envelope.row_count,
                                    duration_ms,
                                    "tool call finished"
                                );
                                Some(ExecutionRecord::from_result(
                                    capability, tool, &envelope, duration_ms, truncated,
                                ))
                            }
                            Err(e) => {
                                if let CapabilityError::Rpc { code, .. } = &e
                                    && *code == INVALID_PARAMS
                                {
                                    // Schema mismatch: our cached catalog is
                                    // stale for this capability.
                                    self.loader.invalidate(capability);
                                }
                                tracing::warn!(
                                    capability = %capability,
                                    tool = %tool,
                                    error = %e,
                                    "tool call failed"
                                );
                                Some(ExecutionRecord::failure(
                                    capability,
                                    tool,
                                    e.to_string(),
                                    duration_ms,
                                ))
                            }
                        }
                    }
                }
            }
        });

        futures::stream::iter(jobs)
            .buffered(self.config.max_parallel_tool_calls.max(1))
            .collect::<Vec<Option<ExecutionRecord>>>()
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
