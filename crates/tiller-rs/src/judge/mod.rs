//! Secondary judges: subordinate model calls whose free-form reply carries a
//! tagged verdict.
//!
//! The governor never interprets judge text directly. It renders a prompt
//! with [`transcript`], calls [`SecondaryJudge::run`] under a timeout, and
//! parses the reply with a [`verdict::VerdictParser`]. Every failure along
//! that path (error, timeout, missing tag) collapses into "no verdict", which
//! each policy maps to its documented default.

pub mod openrouter;
pub mod scripted;
pub mod transcript;
pub mod verdict;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub use openrouter::OpenRouterJudge;
pub use scripted::ScriptedJudge;
pub use verdict::{Verdict, VerdictParser};

/// Boxed future returned by [`SecondaryJudge::run`].
pub type JudgeFuture<'a> = Pin<Box<dyn Future<Output = Result<String, JudgeError>> + Send + 'a>>;

/// Why a judge call produced no text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JudgeError {
    #[error("judge request failed: {0}")]
    Request(String),
    #[error("judge API HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("judge API error: {0}")]
    Api(String),
    #[error("failed to decode judge response: {0}")]
    Decode(String),
    #[error("judge returned no content")]
    Empty,
    #[error("judge did not answer within {0:?}")]
    Timeout(Duration),
}

/// A subordinate agent that answers one prompt with free-form text.
///
/// Implementations must be cheap to share: the governor holds them behind
/// `Arc` and may hand the same judge to several policies.
///
/// # Example
///
/// ```ignore
/// struct AlwaysComplete;
///
/// impl SecondaryJudge for AlwaysComplete {
///     fn run(&self, _prompt: &str) -> JudgeFuture<'_> {
///         Box::pin(async { Ok("<judge_result>true</judge_result>".to_string()) })
///     }
/// }
/// ```
pub trait SecondaryJudge: Send + Sync {
    /// Answer `prompt`.
    fn run(&self, prompt: &str) -> JudgeFuture<'_>;

    /// Short label for logs.
    fn name(&self) -> &str {
        "judge"
    }
}

/// Run `judge` with a deadline. A timeout is reported as
/// [`JudgeError::Timeout`], never as a panic or a hang.
pub async fn run_with_timeout(
    judge: &dyn SecondaryJudge,
    prompt: &str,
    timeout: Duration,
) -> Result<String, JudgeError> {
    match tokio::time::timeout(timeout, judge.run(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(JudgeError::Timeout(timeout)),
    }
}
