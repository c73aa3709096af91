//! Post-turn validation of plan-mutation actions.
//!
//! A plan update is shown to a secondary judge together with the
//! conversation so far. If the judge rejects it, the update is stripped from
//! the response and the agent is told why. Validation is throttled
//! (skip the first N updates, then check every Nth) and capped per run.
//!
//! Any failure to get a verdict lets the update through.

use super::action::{ModelResponse, PLAN_ACTION};
use super::config::{JudgeConfig, PlanValidationConfig};
use super::Review;
use crate::Message;
use crate::judge::transcript::{self, RoleTags};
use crate::judge::verdict::{PLAN_VERDICT, Verdict};
use crate::judge::{SecondaryJudge, run_with_timeout};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Counters for one run. Never reset.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationState {
    /// Plan-mutation turns seen, validated or not.
    pub call_count: u32,
    /// Judge calls made.
    pub validation_count: u32,
}

/// Why a plan-mutation turn passed without a judge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Within the first `skip_first_n` updates.
    Warmup,
    /// Not on the `validate_every_n` cadence.
    OffCadence,
    /// `max_validations` already spent.
    CapReached,
}

/// Validates plan-mutation actions.
pub struct PlanValidationGate {
    config: PlanValidationConfig,
    judge_config: JudgeConfig,
    judge: Arc<dyn SecondaryJudge>,
    state: ValidationState,
}

impl std::fmt::Debug for PlanValidationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanValidationGate")
            .field("config", &self.config)
            .field("judge", &self.judge.name())
            .field("state", &self.state)
            .finish()
    }
}

impl PlanValidationGate {
    pub fn new(
        config: PlanValidationConfig,
        judge_config: JudgeConfig,
        judge: Arc<dyn SecondaryJudge>,
    ) -> Self {
        Self {
            config,
            judge_config,
            judge,
            state: ValidationState::default(),
        }
    }

    pub fn state(&self) -> ValidationState {
        self.state
    }

    /// Count this plan-mutation turn and decide whether it is validated.
    ///
    /// The call counter moves on every turn, skipped or not, so the cadence
    /// keeps advancing: with `every_n = 2` and no warmup, turns 2, 4, 6, …
    /// are validated.
    fn throttle(&mut self) -> Option<SkipReason> {
        self.state.call_count += 1;
        let call = self.state.call_count;
        if call <= self.config.skip_first_n {
            return Some(SkipReason::Warmup);
        }
        if (call - self.config.skip_first_n) % self.config.validate_every_n.max(1) != 0 {
            return Some(SkipReason::OffCadence);
        }
        if self.state.validation_count >= self.config.max_validations {
            return Some(SkipReason::CapReached);
        }
        None
    }

    /// Review a response containing at least one plan-mutation action.
    pub async fn review(&mut self, mut response: ModelResponse, messages: &[Message]) -> Review {
        if let Some(reason) = self.throttle() {
            info!(
                "Skipping {PLAN_ACTION} validation (call #{}): {reason:?}",
                self.state.call_count
            );
            return Review::pass(response);
        }

        self.state.validation_count += 1;
        info!(
            "Validating {PLAN_ACTION} (validation {}/{})",
            self.state.validation_count, self.config.max_validations
        );

        let prompt = plan_prompt(messages, &response, &self.judge_config);
        let timeout = self.judge_config.timeout();
        let reply = match run_with_timeout(self.judge.as_ref(), &prompt, timeout).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Plan judge failed, accepting {PLAN_ACTION}: {e}");
                return Review::judged(response, None);
            }
        };

        let verdict = match PLAN_VERDICT.parse(&reply) {
            Some(v) => v,
            None => {
                warn!("Plan judge reply has no <validation_result> tag, accepting {PLAN_ACTION}");
                return Review::judged(response, None);
            }
        };
        if verdict.valid {
            info!("{PLAN_ACTION} validation passed");
            return Review::judged(response, None);
        }

        let removed = response.remove_plan_mutations();
        warn!(
            "{PLAN_ACTION} validation failed, removed {removed} call(s): {}",
            verdict.reason.as_deref().unwrap_or("(no reason)")
        );
        let feedback = rejection_feedback(&verdict);
        Review::judged(response, Some(feedback))
    }
}

/// Prompt shown to the plan judge.
pub(crate) fn plan_prompt(
    messages: &[Message],
    response: &ModelResponse,
    judge_config: &JudgeConfig,
) -> String {
    let history = transcript::render(messages, judge_config.truncation, RoleTags::Upper);
    let calls: Vec<String> = response.plan_mutations().map(|a| a.pretty_arguments()).collect();
    format!(
        "<system_reminder>\n\
         Please evaluate if the {PLAN_ACTION} tool call(s) below are reasonable and appropriate.\n\
         </system_reminder>\n\n\
         <conversation_history>\n{history}\n</conversation_history>\n\n\
         <todo_write_calls>\n{}\n</todo_write_calls>\n\n\
         Please evaluate and provide your judgment.",
        calls.join("\n\n---\n\n")
    )
}

/// Feedback appended after a rejected plan update.
pub(crate) fn rejection_feedback(verdict: &Verdict) -> String {
    let mut out = format!("**{PLAN_ACTION} Validation Failed**");
    if let Some(reason) = &verdict.reason {
        out.push_str(&format!("\n**Reason**: {reason}"));
    }
    if let Some(suggestion) = &verdict.suggestion {
        out.push_str(&format!("\n**Suggestion**: {suggestion}"));
    }
    out.push_str("\n\nPlease adjust your research plan based on the feedback.");
    out
}
