//! Token counting for budget decisions.
//!
//! Two strategies: an exact BPE tokenizer (`tiktoken-rs`, resolved from a
//! model id) and a character-ratio estimate. Budgeting must never block the
//! turn loop, so a tokenizer that fails to load degrades to the estimate
//! instead of returning an error.

use crate::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use tiktoken_rs::CoreBPE;
use tracing::{info, warn};

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Default model id used to pick a BPE encoding.
pub const DEFAULT_TOKENIZER_MODEL: &str = "gpt-4o";

/// Fixed cost of message framing (role, separators) under the exact strategy.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// How tokens are counted.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenStrategy {
    /// Exact subword tokenization.
    #[default]
    Tiktoken,
    /// `ceil(chars / chars_per_token)`, no per-message overhead.
    Fallback,
}

impl fmt::Display for TokenStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenStrategy::Tiktoken => write!(f, "tiktoken"),
            TokenStrategy::Fallback => write!(f, "fallback"),
        }
    }
}

/// Counts tokens for messages and message sequences.
///
/// `count` is additive: the cost of a sequence is the sum of the costs of
/// its messages.
pub struct TokenCounter {
    bpe: Option<CoreBPE>,
    chars_per_token: f64,
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter")
            .field("strategy", &self.strategy())
            .field("chars_per_token", &self.chars_per_token)
            .finish()
    }
}

impl TokenCounter {
    /// Build a counter for `strategy`. For [`TokenStrategy::Tiktoken`] the
    /// encoding is resolved from `model`; unknown models fall back to the
    /// character estimate with a warning.
    pub fn new(strategy: TokenStrategy, model: &str, chars_per_token: f64) -> Self {
        let bpe = match strategy {
            TokenStrategy::Fallback => None,
            TokenStrategy::Tiktoken => match tiktoken_rs::get_bpe_from_model(model) {
                Ok(bpe) => Some(bpe),
                Err(e) => {
                    warn!(
                        "No tokenizer for model '{model}' ({e}), \
                         falling back to ~{chars_per_token} chars/token"
                    );
                    None
                }
            },
        };
        let counter = Self {
            bpe,
            chars_per_token,
        };
        info!(
            "Initialized token counter: strategy={}, model={model}",
            counter.strategy()
        );
        counter
    }

    /// Character-ratio counter with the given ratio.
    pub fn fallback(chars_per_token: f64) -> Self {
        Self {
            bpe: None,
            chars_per_token,
        }
    }

    /// The strategy actually in effect (after any failover).
    pub fn strategy(&self) -> TokenStrategy {
        if self.bpe.is_some() {
            TokenStrategy::Tiktoken
        } else {
            TokenStrategy::Fallback
        }
    }

    /// Tokens in a bare string.
    pub fn count_text(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => (text.chars().count() as f64 / self.chars_per_token).ceil() as usize,
        }
    }

    /// Tokens for one message: content plus tool-call names and arguments.
    pub fn count_message(&self, message: &Message) -> usize {
        let overhead = if self.bpe.is_some() {
            MESSAGE_OVERHEAD_TOKENS
        } else {
            0
        };
        let calls: usize = message
            .tool_calls
            .iter()
            .flatten()
            .map(|c| self.count_text(&c.function.name) + self.count_text(&c.function.arguments))
            .sum();
        overhead + self.count_text(message.text()) + calls
    }

    /// Tokens for a message sequence.
    pub fn count(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::fallback(DEFAULT_CHARS_PER_TOKEN)
    }
}
