//! The turn-level governor.
//!
//! [`Governor`] owns one agent's policies and is called by the
//! turn-execution engine at two points:
//!
//! - [`Governor::pre_turn`] runs the [`ContextBudgetGuard`] over the
//!   conversation before it is sent to the model.
//! - [`Governor::post_turn`] inspects the parsed model response. If it holds
//!   a plan update, the [`PlanValidationGate`] reviews it; otherwise the
//!   [`ContinuationArbiter`] decides whether a finishing response may end
//!   the run. Exactly one of the two runs per turn.
//!
//! ```text
//!            plan update              judge done
//!  Running ───────────────▶ Validating ──────────▶ Running
//!     │
//!     │ will finish           complete / cap
//!     └─────────────────▶ Arbitrating ──────────▶ Terminated
//!                              │ incomplete
//!                              └──────────────▶ Running
//! ```
//!
//! Nothing here aborts the engine's loop: judge failures fall back to
//! documented defaults and archive failures leave messages uncompressed.

pub mod action;
pub mod config;
pub mod continuation;
pub mod plan_gate;
pub mod trace;

pub use action::{Action, ModelResponse};
pub use config::{ConfigError, GovernorConfig};
pub use continuation::{ContinuationArbiter, ContinuationState};
pub use plan_gate::{PlanValidationGate, ValidationState};

use crate::Message;
use crate::context::archive::MessageArchive;
use crate::context::guard::{CompressionReport, ContextBudgetGuard};
use crate::context::tokens::TokenCounter;
use crate::judge::SecondaryJudge;
use crate::store::{AgentIdentity, SharedStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ── Policy results ─────────────────────────────────────────────────

/// Result of one post-turn policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub response: ModelResponse,
    /// Feedback for the agent. `Some` forces another model call.
    pub feedback: Option<String>,
    /// Whether a judge was consulted.
    pub judged: bool,
}

impl Review {
    pub(crate) fn pass(response: ModelResponse) -> Self {
        Self {
            response,
            feedback: None,
            judged: false,
        }
    }

    pub(crate) fn judged(response: ModelResponse, feedback: Option<String>) -> Self {
        Self {
            response,
            feedback,
            judged: true,
        }
    }
}

// ── Turn outcome ───────────────────────────────────────────────────

/// Where the run stands.
///
/// Between completed calls the phase is `Running` or `Terminated`.
/// `Validating` and `Arbitrating` hold only while [`Governor::post_turn`]
/// awaits a judge, so they are seen after the fact only when the engine
/// drops a `post_turn` future mid-judge. The next `post_turn` starts over.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Running,
    /// A plan update is with the plan judge.
    Validating,
    /// A finishing response is with the completeness judge.
    Arbitrating,
    Terminated,
}

/// What the engine should do after a post-turn.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Execute the response's actions and keep going.
    Proceed,
    /// Append the feedback messages and call the model again.
    ForceContinue,
    /// The run may end.
    Finish,
}

impl Disposition {
    pub fn force_continue(self) -> bool {
        self == Disposition::ForceContinue
    }

    pub fn is_finished(self) -> bool {
        self == Disposition::Finish
    }
}

/// Result of [`Governor::post_turn`].
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The response, with rejected actions removed.
    pub response: ModelResponse,
    /// Messages to append after the assistant message, in order.
    pub appended_messages: Vec<Message>,
    pub disposition: Disposition,
}

// ── Governor ───────────────────────────────────────────────────────

/// Builder for [`Governor`]. Both judges are required.
pub struct GovernorBuilder {
    config: GovernorConfig,
    agent: AgentIdentity,
    store: Option<Arc<SharedStore>>,
    plan_judge: Option<Arc<dyn SecondaryJudge>>,
    continuation_judge: Option<Arc<dyn SecondaryJudge>>,
    counter: Option<TokenCounter>,
}

impl GovernorBuilder {
    pub fn agent(mut self, agent: AgentIdentity) -> Self {
        self.agent = agent;
        self
    }

    /// Store shared with other agents. A private store is created if unset.
    pub fn store(mut self, store: Arc<SharedStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn plan_judge(mut self, judge: Arc<dyn SecondaryJudge>) -> Self {
        self.plan_judge = Some(judge);
        self
    }

    pub fn continuation_judge(mut self, judge: Arc<dyn SecondaryJudge>) -> Self {
        self.continuation_judge = Some(judge);
        self
    }

    /// Use this counter instead of one built from the tokenizer config.
    pub fn token_counter(mut self, counter: TokenCounter) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Validate the config and assemble the policies.
    pub fn build(self) -> Result<Governor, ConfigError> {
        self.config.validate()?;
        let plan_judge = self.plan_judge.ok_or(ConfigError::MissingJudge("plan"))?;
        let continuation_judge = self
            .continuation_judge
            .ok_or(ConfigError::MissingJudge("continuation"))?;
        let store = self.store.unwrap_or_default();
        let config = self.config;

        let counter = self.counter.unwrap_or_else(|| {
            TokenCounter::new(
                config.tokenizer.strategy,
                &config.tokenizer.model,
                config.tokenizer.chars_per_token,
            )
        });
        let archive = MessageArchive::new(
            Arc::clone(&store),
            self.agent.clone(),
            config.archive_dir.clone(),
        );

        info!(
            "Governor ready for {}: budget={} tokens, plan judge={}, continuation judge={}",
            self.agent,
            config.compression.max_context_tokens,
            plan_judge.name(),
            continuation_judge.name()
        );

        Ok(Governor {
            guard: ContextBudgetGuard::new(config.compression.clone(), counter, archive),
            plan_gate: PlanValidationGate::new(
                config.plan_validation.clone(),
                config.judge.clone(),
                plan_judge,
            ),
            arbiter: ContinuationArbiter::new(
                config.continuation.clone(),
                config.judge.clone(),
                continuation_judge,
            ),
            agent: self.agent,
            store,
            phase: Phase::Running,
            last_compression: None,
        })
    }
}

/// One agent's turn-level governor.
#[derive(Debug)]
pub struct Governor {
    agent: AgentIdentity,
    store: Arc<SharedStore>,
    guard: ContextBudgetGuard,
    plan_gate: PlanValidationGate,
    arbiter: ContinuationArbiter,
    phase: Phase,
    last_compression: Option<CompressionReport>,
}

impl Governor {
    pub fn builder(config: GovernorConfig) -> GovernorBuilder {
        GovernorBuilder {
            config,
            agent: AgentIdentity::default(),
            store: None,
            plan_judge: None,
            continuation_judge: None,
            counter: None,
        }
    }

    pub fn agent(&self) -> &AgentIdentity {
        &self.agent
    }

    pub fn store(&self) -> &Arc<SharedStore> {
        &self.store
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn validation_state(&self) -> ValidationState {
        self.plan_gate.state()
    }

    pub fn continuation_state(&self) -> ContinuationState {
        self.arbiter.state()
    }

    /// Report of the most recent compression pass, if any pass has run.
    pub fn last_compression(&self) -> Option<&CompressionReport> {
        self.last_compression.as_ref()
    }

    /// Tokens in `messages` as the budget guard counts them.
    pub fn count_tokens(&self, messages: &[Message]) -> usize {
        self.guard.counter().count(messages)
    }

    /// Bring the conversation within budget before a model call.
    pub async fn pre_turn(&mut self, messages: Vec<Message>) -> Vec<Message> {
        let (messages, report) = self.guard.enforce(messages).await;
        if report.is_some() {
            self.last_compression = report;
        }
        messages
    }

    /// Review a parsed model response.
    ///
    /// `messages` is the conversation the response was generated from.
    pub async fn post_turn(
        &mut self,
        response: ModelResponse,
        messages: &[Message],
    ) -> TurnOutcome {
        if self.phase == Phase::Terminated {
            warn!("post_turn called after termination for {}", self.agent);
        }

        let finishing = !response.has_plan_mutation() && response.will_finish();
        let review = if response.has_plan_mutation() {
            self.phase = Phase::Validating;
            self.plan_gate.review(response, messages).await
        } else if finishing {
            self.phase = Phase::Arbitrating;
            self.arbiter.arbitrate(response, messages).await
        } else {
            Review::pass(response)
        };

        let outcome = match review.feedback {
            Some(feedback) => {
                self.phase = Phase::Running;
                TurnOutcome {
                    response: review.response,
                    appended_messages: vec![Message::user(feedback)],
                    disposition: Disposition::ForceContinue,
                }
            }
            None if finishing => {
                self.phase = Phase::Terminated;
                TurnOutcome {
                    response: review.response,
                    appended_messages: Vec::new(),
                    disposition: Disposition::Finish,
                }
            }
            None => {
                self.phase = Phase::Running;
                TurnOutcome {
                    response: review.response,
                    appended_messages: Vec::new(),
                    disposition: Disposition::Proceed,
                }
            }
        };
        debug!(
            "post_turn for {}: judged={}, disposition={:?}, phase={:?}",
            self.agent, review.judged, outcome.disposition, self.phase
        );

        self.record_trace(messages, &outcome).await;
        outcome
    }

    async fn record_trace(&self, messages: &[Message], outcome: &TurnOutcome) {
        let mut snapshot = messages.to_vec();
        snapshot.push(outcome.response.to_message());
        snapshot.extend(outcome.appended_messages.iter().cloned());
        if let Err(e) = trace::record(&self.store, &self.agent, snapshot).await {
            warn!("Failed to record message trace for {}: {e}", self.agent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;
    use crate::context::tokens::TokenStrategy;
    use crate::judge::{JudgeError, JudgeFuture, ScriptedJudge};
    use super::action::{HANDOFF_ACTION, PLAN_ACTION};
    use std::time::Duration;

    /// A judge that never answers.
    struct StalledJudge;

    impl SecondaryJudge for StalledJudge {
        fn run(&self, _prompt: &str) -> JudgeFuture<'_> {
            Box::pin(std::future::pending::<Result<String, JudgeError>>())
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    fn governor(
        config: GovernorConfig,
        plan: Arc<ScriptedJudge>,
        cont: Arc<ScriptedJudge>,
    ) -> Governor {
        Governor::builder(config.with_tokenizer(TokenStrategy::Fallback, 1.0))
            .agent(AgentIdentity::new("researcher", "t1"))
            .plan_judge(plan)
            .continuation_judge(cont)
            .build()
            .unwrap()
    }

    fn history() -> Vec<Message> {
        vec![Message::system("sys"), Message::user("research X")]
    }

    fn plan_and_handoff() -> ModelResponse {
        ModelResponse::from_parts(
            None,
            vec![
                ToolCall::function("p", PLAN_ACTION, "{}"),
                ToolCall::function("h", HANDOFF_ACTION, "{}"),
            ],
        )
    }

    #[test]
    fn build_requires_both_judges() {
        let judge = Arc::new(ScriptedJudge::default());
        let err = Governor::builder(GovernorConfig::default())
            .plan_judge(judge)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingJudge("continuation")));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let judge = Arc::new(ScriptedJudge::default());
        let err = Governor::builder(GovernorConfig::default().with_max_context_tokens(0))
            .plan_judge(judge.clone())
            .continuation_judge(judge)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[tokio::test]
    async fn plan_gate_and_arbiter_never_both_run() {
        let plan = Arc::new(ScriptedJudge::new(["<validation_result>true</validation_result>"]));
        let cont = Arc::new(ScriptedJudge::default());
        let mut g = governor(GovernorConfig::default(), plan.clone(), cont.clone());

        let outcome = g.post_turn(plan_and_handoff(), &history()).await;
        assert_eq!(plan.calls(), 1);
        assert_eq!(cont.calls(), 0);
        assert_eq!(outcome.disposition, Disposition::Proceed);
        assert_eq!(g.phase(), Phase::Running);
    }

    #[tokio::test]
    async fn rejected_plan_forces_continuation_with_user_feedback() {
        let plan = Arc::new(ScriptedJudge::new([
            "<validation_result>no</validation_result>\
             <validation_reason>Redundant.</validation_reason>",
        ]));
        let mut g = governor(GovernorConfig::default(), plan, Arc::new(ScriptedJudge::default()));

        let outcome = g.post_turn(plan_and_handoff(), &history()).await;
        assert!(outcome.disposition.force_continue());
        assert_eq!(outcome.appended_messages.len(), 1);
        assert_eq!(outcome.appended_messages[0].role, crate::MessageRole::User);
        assert!(outcome.appended_messages[0].text().contains("Redundant."));
        assert!(!outcome.response.has_plan_mutation());
        assert_eq!(g.validation_state().validation_count, 1);
    }

    #[tokio::test]
    async fn working_turn_proceeds_without_judges() {
        let plan = Arc::new(ScriptedJudge::default());
        let cont = Arc::new(ScriptedJudge::default());
        let mut g = governor(GovernorConfig::default(), plan.clone(), cont.clone());
        let response = ModelResponse::from_parts(
            None,
            vec![ToolCall::function("s", "web_search", "{}")],
        );
        let outcome = g.post_turn(response.clone(), &history()).await;
        assert_eq!(outcome.response, response);
        assert_eq!(outcome.disposition, Disposition::Proceed);
        assert_eq!(plan.calls() + cont.calls(), 0);
    }

    #[tokio::test]
    async fn continuation_cap_terminates_without_judge() {
        let cont = Arc::new(ScriptedJudge::default());
        let mut g = governor(
            GovernorConfig::default().with_max_continuations(0),
            Arc::new(ScriptedJudge::default()),
            cont.clone(),
        );
        let outcome = g.post_turn(ModelResponse::text("done"), &history()).await;
        assert!(outcome.disposition.is_finished());
        assert_eq!(g.phase(), Phase::Terminated);
        assert_eq!(cont.calls(), 0);
    }

    #[tokio::test]
    async fn post_turn_publishes_trace() {
        let cont = Arc::new(ScriptedJudge::new([
            "<judge_result>false</judge_result><judge_reason>Go deeper.</judge_reason>",
        ]));
        let mut g = governor(GovernorConfig::default(), Arc::new(ScriptedJudge::default()), cont);
        g.post_turn(ModelResponse::text("done?"), &history()).await;

        let stored = trace::load(g.store(), g.agent()).unwrap().unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[2].text(), "done?");
        assert!(stored[3].text().contains("Go deeper."));
    }

    #[tokio::test]
    async fn pre_turn_keeps_report_of_last_pass() {
        let mut g = governor(
            GovernorConfig::default()
                .with_max_context_tokens(50)
                .with_min_compress_tokens(10)
                .with_keep_last_n(1),
            Arc::new(ScriptedJudge::default()),
            Arc::new(ScriptedJudge::default()),
        );
        let small = g.pre_turn(history()).await;
        assert_eq!(small, history());
        assert!(g.last_compression().is_none());

        let big = vec![
            Message::system("sys"),
            Message::user("task"),
            Message::tool_result("c", "r".repeat(500)),
            Message::user("next"),
        ];
        let out = g.pre_turn(big).await;
        assert!(out[2].compressed);
        assert_eq!(g.last_compression().unwrap().compressed, 1);
    }

    #[tokio::test]
    async fn cancelled_post_turn_leaves_judge_phase_visible() {
        let stalled: Arc<dyn SecondaryJudge> = Arc::new(StalledJudge);
        let mut g = Governor::builder(
            GovernorConfig::default().with_tokenizer(TokenStrategy::Fallback, 1.0),
        )
        .plan_judge(Arc::clone(&stalled))
        .continuation_judge(stalled)
        .build()
        .unwrap();

        let messages = history();
        let handoff = ModelResponse::from_parts(
            None,
            vec![ToolCall::function("h", HANDOFF_ACTION, "{}")],
        );
        let turn = g.post_turn(handoff, &messages);
        assert!(tokio::time::timeout(Duration::from_millis(20), turn).await.is_err());
        assert_eq!(g.phase(), Phase::Arbitrating);

        let turn = g.post_turn(plan_and_handoff(), &messages);
        assert!(tokio::time::timeout(Duration::from_millis(20), turn).await.is_err());
        assert_eq!(g.phase(), Phase::Validating);

        let search = ModelResponse::from_parts(
            None,
            vec![ToolCall::function("s", "web_search", "{}")],
        );
        let outcome = g.post_turn(search, &messages).await;
        assert_eq!(outcome.disposition, Disposition::Proceed);
        assert_eq!(g.phase(), Phase::Running);
    }
}
