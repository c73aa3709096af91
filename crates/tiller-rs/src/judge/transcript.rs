//! Render a conversation into the text block a judge reads.
//!
//! The system message (index 0) is never shown to a judge. Messages without
//! text content are skipped. Long contents keep their head and tail around
//! an elision marker so the judge still sees how a message starts and ends.

use crate::{Message, MessageRole};
use serde::{Deserialize, Serialize};

/// Inserted between the kept head and tail of a truncated message.
pub const ELISION_MARKER: &str = "\n...[truncated]...\n";

/// Head/tail character limits for long message contents.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Truncation {
    pub head_chars: usize,
    pub tail_chars: usize,
}

impl Default for Truncation {
    fn default() -> Self {
        Self {
            head_chars: 4000,
            tail_chars: 4000,
        }
    }
}

impl Truncation {
    /// Apply to one content string. Contents up to `head + tail` characters
    /// are returned unchanged.
    pub fn apply(&self, content: &str) -> String {
        let len = content.chars().count();
        if len <= self.head_chars.saturating_add(self.tail_chars) {
            return content.to_string();
        }
        let head: String = content.chars().take(self.head_chars).collect();
        let tail: String = content.chars().skip(len - self.tail_chars).collect();
        format!("{head}{ELISION_MARKER}{tail}")
    }
}

/// How role names are written around each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleTags {
    /// `<user>…</user>`, blocks separated by blank lines with a trailing one.
    Lower,
    /// `<USER>…</USER>`, blocks joined by blank lines.
    Upper,
}

fn role_name(role: MessageRole, tags: RoleTags) -> String {
    match tags {
        RoleTags::Lower => role.to_string(),
        RoleTags::Upper => role.to_string().to_uppercase(),
    }
}

/// Render every message after the system prompt.
pub fn render(messages: &[Message], truncation: Truncation, tags: RoleTags) -> String {
    let blocks: Vec<String> = messages
        .iter()
        .skip(1)
        .filter(|m| !m.text().is_empty())
        .map(|m| {
            let role = role_name(m.role, tags);
            format!("<{role}>\n{}\n</{role}>", truncation.apply(m.text()))
        })
        .collect();
    match tags {
        RoleTags::Upper => blocks.join("\n\n"),
        RoleTags::Lower => blocks.iter().map(|b| format!("{b}\n\n")).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;

    #[test]
    fn system_message_and_empty_contents_are_skipped() {
        let messages = vec![
            Message::system("secret instructions"),
            Message::user("task"),
            Message::assistant_tool_calls(vec![ToolCall::function("c", "search", "{}")]),
            Message::tool_result("c", "hits"),
        ];
        let out = render(&messages, Truncation::default(), RoleTags::Upper);
        assert_eq!(out, "<USER>\ntask\n</USER>\n\n<TOOL>\nhits\n</TOOL>");
        assert!(!out.contains("secret"));
    }

    #[test]
    fn lower_tags_end_every_block_with_a_blank_line() {
        let messages = vec![Message::system("s"), Message::assistant_text("done")];
        assert_eq!(
            render(&messages, Truncation::default(), RoleTags::Lower),
            "<assistant>\ndone\n</assistant>\n\n"
        );
    }

    #[test]
    fn long_content_keeps_head_and_tail() {
        let t = Truncation::default();
        let content = format!("{}{}{}", "a".repeat(4000), "m".repeat(10), "z".repeat(4000));
        let out = t.apply(&content);
        assert_eq!(
            out,
            format!("{}{ELISION_MARKER}{}", "a".repeat(4000), "z".repeat(4000))
        );

        let exact = "b".repeat(8000);
        assert_eq!(t.apply(&exact), exact);
    }

    #[test]
    fn truncation_counts_characters() {
        let t = Truncation {
            head_chars: 2,
            tail_chars: 2,
        };
        assert_eq!(t.apply("äöüßéè"), format!("äö{ELISION_MARKER}éè"));
    }

    #[test]
    fn huge_limits_keep_content_whole() {
        let t = Truncation {
            head_chars: usize::MAX,
            tail_chars: 1,
        };
        assert_eq!(t.apply("short"), "short");
    }
}
