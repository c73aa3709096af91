//! Parse a tagged verdict out of free-form judge text.
//!
//! A judge reply is expected to contain something like:
//!
//! ```text
//! <validation_result>false</validation_result>
//! <validation_reason>The plan drops the comparison step.</validation_reason>
//! <validation_suggestion>Add a task comparing both vendors.</validation_suggestion>
//! ```
//!
//! The result tag accepts `true/false/yes/no/1/0` in any case, with optional
//! attributes on the opening tag and surrounding whitespace. The first
//! matching result tag wins. A reply without one yields `None`; callers pick
//! the default.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Tag names used by one kind of judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerdictTags {
    pub result: &'static str,
    pub reason: &'static str,
    pub suggestion: Option<&'static str>,
}

/// Tags the plan-validation judge answers with.
pub const PLAN_TAGS: VerdictTags = VerdictTags {
    result: "validation_result",
    reason: "validation_reason",
    suggestion: Some("validation_suggestion"),
};

/// Tags the completeness judge answers with.
pub const COMPLETION_TAGS: VerdictTags = VerdictTags {
    result: "judge_result",
    reason: "judge_reason",
    suggestion: None,
};

/// A parsed verdict.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub valid: bool,
    /// Trimmed; `None` when the tag is absent or empty.
    pub reason: Option<String>,
    pub suggestion: Option<String>,
}

/// Compiled patterns for one [`VerdictTags`] set.
#[derive(Debug, Clone)]
pub struct VerdictParser {
    tags: VerdictTags,
    result: Regex,
    reason: Regex,
    suggestion: Option<Regex>,
}

fn text_pattern(tag: &str) -> Result<Regex, regex::Error> {
    let tag = regex::escape(tag);
    Regex::new(&format!(r"(?is)<{tag}[^>]*>(.*?)</{tag}>"))
}

impl VerdictParser {
    pub fn new(tags: VerdictTags) -> Result<Self, regex::Error> {
        let result_tag = regex::escape(tags.result);
        let result = Regex::new(&format!(
            r"(?is)<{result_tag}[^>]*>\s*(true|false|yes|no|1|0)\s*</{result_tag}>"
        ))?;
        Ok(Self {
            tags,
            result,
            reason: text_pattern(tags.reason)?,
            suggestion: tags.suggestion.map(text_pattern).transpose()?,
        })
    }

    pub fn tags(&self) -> VerdictTags {
        self.tags
    }

    /// Extract the verdict, or `None` if no recognizable result tag exists.
    pub fn parse(&self, reply: &str) -> Option<Verdict> {
        let value = self.result.captures(reply)?.get(1)?.as_str().to_ascii_lowercase();
        let valid = matches!(value.as_str(), "true" | "yes" | "1");
        Some(Verdict {
            valid,
            reason: extract(&self.reason, reply),
            suggestion: self.suggestion.as_ref().and_then(|re| extract(re, reply)),
        })
    }
}

fn extract(re: &Regex, reply: &str) -> Option<String> {
    let text = re.captures(reply)?.get(1)?.as_str().trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Parser for [`PLAN_TAGS`].
pub static PLAN_VERDICT: LazyLock<VerdictParser> =
    LazyLock::new(|| VerdictParser::new(PLAN_TAGS).expect("plan verdict patterns"));

/// Parser for [`COMPLETION_TAGS`].
pub static COMPLETION_VERDICT: LazyLock<VerdictParser> =
    LazyLock::new(|| VerdictParser::new(COMPLETION_TAGS).expect("completion verdict patterns"));
