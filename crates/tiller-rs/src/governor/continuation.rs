//! Post-turn arbitration of termination.
//!
//! When a response would end the run (no actions, or a handoff), a
//! completeness judge reads the research history. If it says the work is
//! incomplete, the handoff is stripped and the agent is told to keep going.
//! After `max_continuations` judge calls the agent may always stop.
//!
//! A reply without a `<judge_result>` tag, a judge error and a timeout are
//! all treated as "complete".

use super::Review;
use super::action::{HANDOFF_ACTION, ModelResponse};
use super::config::{ContinuationConfig, JudgeConfig};
use crate::Message;
use crate::judge::transcript::{self, RoleTags};
use crate::judge::verdict::COMPLETION_VERDICT;
use crate::judge::{SecondaryJudge, run_with_timeout};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reason used when the judge says "incomplete" without explaining.
pub const DEFAULT_INCOMPLETE_REASON: &str =
    "The research is incomplete. Please continue with more in-depth investigation.";

const COMPLETENESS_INSTRUCTION: &str =
    "Please judge if the research agent has completed all required research tasks comprehensively.";

/// Counter for one run. Never reset.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContinuationState {
    pub continue_count: u32,
}

/// Decides whether a finishing response may end the run.
pub struct ContinuationArbiter {
    config: ContinuationConfig,
    judge_config: JudgeConfig,
    judge: Arc<dyn SecondaryJudge>,
    state: ContinuationState,
}

impl std::fmt::Debug for ContinuationArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuationArbiter")
            .field("config", &self.config)
            .field("judge", &self.judge.name())
            .field("state", &self.state)
            .finish()
    }
}

/// What the completeness judge decided.
enum Completeness {
    Complete,
    Incomplete(String),
}

impl ContinuationArbiter {
    pub fn new(
        config: ContinuationConfig,
        judge_config: JudgeConfig,
        judge: Arc<dyn SecondaryJudge>,
    ) -> Self {
        Self {
            config,
            judge_config,
            judge,
            state: ContinuationState::default(),
        }
    }

    pub fn state(&self) -> ContinuationState {
        self.state
    }

    /// Review a response with no plan-mutation action.
    pub async fn arbitrate(
        &mut self,
        mut response: ModelResponse,
        messages: &[Message],
    ) -> Review {
        if !response.will_finish() {
            return Review::pass(response);
        }
        if self.state.continue_count >= self.config.max_continuations {
            info!(
                "Continuation cap reached ({}), allowing termination",
                self.config.max_continuations
            );
            return Review::pass(response);
        }

        self.state.continue_count += 1;
        info!(
            "Judging completeness (check {}/{})",
            self.state.continue_count, self.config.max_continuations
        );

        match self.judge_completeness(messages).await {
            Completeness::Complete => {
                info!("Research judged complete, allowing termination");
                Review::judged(response, None)
            }
            Completeness::Incomplete(reason) => {
                let removed = response.remove_terminations();
                info!("Research judged incomplete, forcing continuation: {reason}");
                debug!("Removed {removed} {HANDOFF_ACTION} call(s)");
                Review::judged(response, Some(continue_feedback(&reason)))
            }
        }
    }

    async fn judge_completeness(&self, messages: &[Message]) -> Completeness {
        let prompt = completeness_prompt(messages, &self.judge_config);
        let timeout = self.judge_config.timeout();
        let reply = match run_with_timeout(self.judge.as_ref(), &prompt, timeout).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Completeness judge failed, treating research as complete: {e}");
                return Completeness::Complete;
            }
        };
        match COMPLETION_VERDICT.parse(&reply) {
            None => {
                warn!(
                    "Completeness judge reply has no <judge_result> tag, \
                     treating research as complete"
                );
                Completeness::Complete
            }
            Some(v) if v.valid => Completeness::Complete,
            Some(v) => Completeness::Incomplete(
                v.reason
                    .unwrap_or_else(|| DEFAULT_INCOMPLETE_REASON.to_string()),
            ),
        }
    }
}

/// Prompt shown to the completeness judge.
pub(crate) fn completeness_prompt(messages: &[Message], judge_config: &JudgeConfig) -> String {
    let history = transcript::render(messages, judge_config.truncation, RoleTags::Lower);
    format!(
        "<system_reminder>\n{COMPLETENESS_INSTRUCTION}\n</system_reminder>\n\n\
         <research_history>\n{history}\n</research_history>"
    )
}

/// Feedback appended when the run is forced to continue.
pub(crate) fn continue_feedback(reason: &str) -> String {
    format!(
        "<system_reminder>\n\
         Your research is not yet complete. Please continue with more investigation.\n\n\
         Reason: {reason}\n\
         </system_reminder>"
    )
}
