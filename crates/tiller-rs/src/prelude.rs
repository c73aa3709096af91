//! Convenience re-exports for common `tiller-rs` types.
//!
//! Meant to be glob-imported by engines embedding the governor:
//!
//! ```ignore
//! use tiller_rs::prelude::*;
//! ```
//!
//! This pulls in what a turn loop needs: the [`Governor`] and its config,
//! the response/action model, judges, the shared store, and message types.
//! Policy internals (archive records, verdict parsers, transcript
//! rendering) are left out; import those from their modules directly.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Message, MessageRole, ToolCall};

// ── Governor ────────────────────────────────────────────────────────
pub use crate::governor::{
    Action, ConfigError, Disposition, Governor, GovernorBuilder, GovernorConfig, ModelResponse,
    Phase, TurnOutcome,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{CompressionReport, TokenCounter, TokenStrategy};

// ── Judges ──────────────────────────────────────────────────────────
pub use crate::judge::{
    JudgeError, JudgeFuture, OpenRouterJudge, ScriptedJudge, SecondaryJudge, Verdict,
};

// ── Shared store ────────────────────────────────────────────────────
pub use crate::store::{AgentIdentity, Key, KeyGuard, SharedStore};
