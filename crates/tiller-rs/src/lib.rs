//! Turn-level governor for autonomous research agents.
//!
//! `tiller-rs` sits between an agent's turn-execution engine and the language
//! model it drives. The engine calls the [`Governor`](governor::Governor) at
//! two fixed hook points:
//!
//! - **pre-turn**: [`ContextBudgetGuard`](context::guard::ContextBudgetGuard)
//!   keeps the conversation under a token budget by archiving older
//!   user/tool messages and replacing them with compact placeholders.
//! - **post-turn**: either the
//!   [`PlanValidationGate`](governor::plan_gate::PlanValidationGate) asks a
//!   secondary judge whether a proposed plan update is sound, or the
//!   [`ContinuationArbiter`](governor::continuation::ContinuationArbiter) asks
//!   whether the agent may stop. A negative verdict strips the offending
//!   action, appends a feedback message, and forces another model call.
//!
//! Cooperating agents (a main researcher and its sub-agents) share a
//! [`SharedStore`](store::SharedStore): typed keys, per-key locks held by RAII
//! guards, so read-modify-write sequences never lose updates.
//!
//! # Getting started
//!
//! ```ignore
//! use tiller_rs::prelude::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(SharedStore::new());
//! let judge = Arc::new(OpenRouterJudge::from_env("anthropic/claude-sonnet-4")?);
//!
//! let mut governor = Governor::builder(GovernorConfig::default())
//!     .agent(AgentIdentity::new("researcher", "a1"))
//!     .store(store)
//!     .plan_judge(judge.clone())
//!     .continuation_judge(judge)
//!     .build()?;
//!
//! // In the engine loop:
//! let messages = governor.pre_turn(messages).await;
//! let response = ModelResponse::from_parts(text, tool_calls);
//! let outcome = governor.post_turn(response, &messages).await;
//! if outcome.disposition.force_continue() {
//!     // append outcome.appended_messages and call the model again
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`governor`] | [`Governor`](governor::Governor), config, plan gate, arbiter, actions |
//! | [`context`] | Token counting, budget guard, compression archive |
//! | [`judge`] | [`SecondaryJudge`](judge::SecondaryJudge), verdicts, transcripts, OpenRouter |
//! | [`store`] | [`SharedStore`](store::SharedStore), resource registry, citations |

pub mod context;
pub mod governor;
pub mod judge;
pub mod prelude;
pub mod store;

use serde::{Deserialize, Serialize};

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for judge calls.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    /// Whether messages of this role may be compressed by the budget guard.
    pub fn is_compressible(self) -> bool {
        matches!(self, MessageRole::User | MessageRole::Tool)
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Where the original of a compressed message was archived.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ArchiveRef {
    /// Store key of the [`CompressionRecord`](context::archive::CompressionRecord).
    pub id: String,
    /// Human-readable location (file path, or `store:<id>`).
    pub locator: String,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set once the budget guard has replaced the content with a placeholder.
    #[serde(default, skip_serializing_if = "is_false")]
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveRef>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl Message {
    fn with_role(role: MessageRole, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            compressed: false,
            archive: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, Some(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, Some(content.into()))
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, Some(content.into()))
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::with_role(MessageRole::Assistant, None)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::with_role(MessageRole::Tool, Some(content.into()))
        }
    }

    /// Message content, or `""` when absent.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

// ── Tool call types ────────────────────────────────────────────────

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    /// Build a function call with raw JSON arguments.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

// ── Chat wire types (judge requests) ───────────────────────────────

/// Chat completion request body. Only the fields the judge needs; unset
/// optional fields are omitted from serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// Raw API response (deserialization target).
#[derive(Deserialize, Debug)]
pub(crate) struct RawChatResponse {
    pub(crate) choices: Option<Vec<RawChoice>>,
    pub(crate) error: Option<ApiErrorResponse>,
    #[serde(default)]
    pub(crate) usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RawChoice {
    pub(crate) message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RawResponseMessage {
    pub(crate) content: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ApiErrorResponse {
    pub(crate) message: String,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}
