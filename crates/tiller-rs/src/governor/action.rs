//! Typed view of a model response.
//!
//! Tool calls are classified once, by name, into a closed set of action
//! kinds. The post-turn policies only ever look at [`Action`] variants.

use crate::{Message, ToolCall};
use serde::Serialize;

/// Tool name of the plan-mutation action.
pub const PLAN_ACTION: &str = "TodoWrite";

/// Tool name of the termination action.
pub const HANDOFF_ACTION: &str = "handoff_to_report_writer";

/// One structured action in a model response.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", content = "call", rename_all = "snake_case")]
pub enum Action {
    /// Proposed change to the tracked task list.
    UpdatePlan(ToolCall),
    /// End the research loop and hand off to the report writer.
    Handoff(ToolCall),
    /// Any other tool.
    Tool(ToolCall),
}

impl Action {
    pub fn from_tool_call(call: ToolCall) -> Self {
        match call.function.name.as_str() {
            PLAN_ACTION => Action::UpdatePlan(call),
            HANDOFF_ACTION => Action::Handoff(call),
            _ => Action::Tool(call),
        }
    }

    pub fn tool_call(&self) -> &ToolCall {
        match self {
            Action::UpdatePlan(c) | Action::Handoff(c) | Action::Tool(c) => c,
        }
    }

    pub fn into_tool_call(self) -> ToolCall {
        match self {
            Action::UpdatePlan(c) | Action::Handoff(c) | Action::Tool(c) => c,
        }
    }

    pub fn is_plan_mutation(&self) -> bool {
        matches!(self, Action::UpdatePlan(_))
    }

    pub fn is_termination(&self) -> bool {
        matches!(self, Action::Handoff(_))
    }

    /// Arguments pretty-printed as JSON, or verbatim if they do not parse.
    pub fn pretty_arguments(&self) -> String {
        let raw = &self.tool_call().function.arguments;
        serde_json::from_str::<serde_json::Value>(raw)
            .and_then(|v| serde_json::to_string_pretty(&v))
            .unwrap_or_else(|_| raw.clone())
    }
}

/// A parsed model response: optional text plus classified actions.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct ModelResponse {
    pub content: Option<String>,
    pub actions: Vec<Action>,
}

impl ModelResponse {
    pub fn from_parts(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content,
            actions: tool_calls.into_iter().map(Action::from_tool_call).collect(),
        }
    }

    /// A text-only response.
    pub fn text(content: impl Into<String>) -> Self {
        Self::from_parts(Some(content.into()), Vec::new())
    }

    pub fn has_plan_mutation(&self) -> bool {
        self.actions.iter().any(Action::is_plan_mutation)
    }

    /// No actions at all, or an explicit termination action.
    pub fn will_finish(&self) -> bool {
        self.actions.is_empty() || self.actions.iter().any(Action::is_termination)
    }

    pub fn plan_mutations(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.is_plan_mutation())
    }

    /// Drop every plan-mutation action. Returns how many were removed.
    pub fn remove_plan_mutations(&mut self) -> usize {
        let before = self.actions.len();
        self.actions.retain(|a| !a.is_plan_mutation());
        before - self.actions.len()
    }

    /// Drop every termination action. Returns how many were removed.
    pub fn remove_terminations(&mut self) -> usize {
        let before = self.actions.len();
        self.actions.retain(|a| !a.is_termination());
        before - self.actions.len()
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.actions.iter().map(|a| a.tool_call().clone()).collect()
    }

    /// The assistant message this response appends to the conversation.
    pub fn to_message(&self) -> Message {
        let calls = self.tool_calls();
        let mut message = if calls.is_empty() {
            Message::assistant_text(self.content.clone().unwrap_or_default())
        } else {
            Message::assistant_tool_calls(calls)
        };
        if message.content.is_none() {
            message.content = self.content.clone();
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str) -> ToolCall {
        ToolCall::function(format!("id-{name}"), name, r#"{"todos":[{"content":"a"}]}"#)
    }

    #[test]
    fn classifies_by_tool_name() {
        let r = ModelResponse::from_parts(
            None,
            vec![call(PLAN_ACTION), call(HANDOFF_ACTION), call("web_search")],
        );
        assert!(r.actions[0].is_plan_mutation());
        assert!(r.actions[1].is_termination());
        assert!(matches!(r.actions[2], Action::Tool(_)));
    }

    #[test]
    fn will_finish_when_empty_or_handoff() {
        assert!(ModelResponse::text("done").will_finish());
        assert!(ModelResponse::from_parts(None, vec![call(HANDOFF_ACTION)]).will_finish());
        assert!(!ModelResponse::from_parts(None, vec![call("web_search")]).will_finish());
    }

    #[test]
    fn removal_keeps_other_actions_in_order() {
        let mut r = ModelResponse::from_parts(
            None,
            vec![call("a"), call(PLAN_ACTION), call("b"), call(PLAN_ACTION)],
        );
        assert_eq!(r.remove_plan_mutations(), 2);
        let names: Vec<_> = r
            .actions
            .iter()
            .map(|a| a.tool_call().function.name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(!r.has_plan_mutation());
    }

    #[test]
    fn pretty_arguments_falls_back_to_raw() {
        let good = Action::from_tool_call(call(PLAN_ACTION));
        assert!(good.pretty_arguments().contains("\n  \"todos\""));
        let bad = Action::from_tool_call(ToolCall::function("x", PLAN_ACTION, "not json"));
        assert_eq!(bad.pretty_arguments(), "not json");
    }

    #[test]
    fn to_message_keeps_text_alongside_calls() {
        let r = ModelResponse::from_parts(Some("thinking".into()), vec![call("web_search")]);
        let m = r.to_message();
        assert_eq!(m.text(), "thinking");
        assert_eq!(m.tool_calls.unwrap().len(), 1);
    }
}
