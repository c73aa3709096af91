//! Pre-turn context budget enforcement.
//!
//! When the conversation exceeds the token budget, older user and tool
//! messages are archived and replaced with compact placeholders. The first
//! user/tool message (the task) and the last `keep_last_n` are never touched.
//!
//! This is a single pass. Every eligible message above the size floor is
//! compressed once, and the total is not re-measured in between, so the
//! result may still exceed the budget.

use super::archive::MessageArchive;
use super::tokens::TokenCounter;
use crate::Message;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Opening tag of every placeholder.
pub const COMPRESSED_TAG: &str = "<compressed_message>";

/// Thresholds for the budget guard.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CompressionConfig {
    /// Total tokens above which compression starts.
    pub max_context_tokens: usize,
    /// Messages smaller than this are never compressed.
    pub min_compress_tokens: usize,
    /// Characters of original content kept in the placeholder.
    pub preview_chars: usize,
    /// Most recent user/tool messages kept verbatim.
    pub keep_last_n: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 100_000,
            min_compress_tokens: 500,
            preview_chars: 200,
            keep_last_n: 3,
        }
    }
}

impl CompressionConfig {
    pub fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    pub fn with_min_compress_tokens(mut self, tokens: usize) -> Self {
        self.min_compress_tokens = tokens;
        self
    }

    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    pub fn with_keep_last_n(mut self, n: usize) -> Self {
        self.keep_last_n = n;
        self
    }
}

/// What one compression pass did.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressionReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    /// User/tool messages in the conversation.
    pub candidates: usize,
    /// Candidates outside the protected set.
    pub eligible: usize,
    pub compressed: usize,
    /// Eligible messages left verbatim because archiving failed.
    pub failed: usize,
}

impl CompressionReport {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "compression: {} -> {} tokens, {}/{} eligible message(s) compressed, {} failed",
            self.tokens_before, self.tokens_after, self.compressed, self.eligible, self.failed,
        )
    }
}

/// Left-truncated preview: the first `max_chars` characters, plus `...` if
/// anything was cut.
pub fn preview(content: &str, max_chars: usize) -> String {
    let mut chars = content.chars();
    let mut out: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        out.push_str("...");
    }
    out
}

fn placeholder(tokens: usize, content: &str, preview_chars: usize, locator: &str) -> String {
    format!(
        "{COMPRESSED_TAG}\n\
         This message has been compressed to save context space.\n\n\
         Original size: {tokens} tokens\n\
         Preview (first {preview_chars} chars):\n\
         <preview>\n{}\n</preview>\n\
         Full message archived at: {locator}\n\
         </compressed_message>",
        preview(content, preview_chars),
    )
}

/// Indices of user/tool messages, and the subset that may be compressed.
fn partition_candidates(messages: &[Message], keep_last_n: usize) -> (usize, Vec<usize>) {
    let candidates: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role.is_compressible())
        .map(|(i, _)| i)
        .collect();
    if candidates.len() <= 1 {
        return (candidates.len(), Vec::new());
    }
    let tail_start = candidates.len().saturating_sub(keep_last_n).max(1);
    (candidates.len(), candidates[1..tail_start].to_vec())
}

/// Enforces the token budget before each model call.
#[derive(Debug)]
pub struct ContextBudgetGuard {
    config: CompressionConfig,
    counter: TokenCounter,
    archive: MessageArchive,
}

impl ContextBudgetGuard {
    pub fn new(config: CompressionConfig, counter: TokenCounter, archive: MessageArchive) -> Self {
        Self {
            config,
            counter,
            archive,
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Compress eligible messages if the conversation is over budget.
    ///
    /// Returns the (possibly modified) conversation and, when compression was
    /// attempted, a report. Under budget the input is returned untouched.
    pub async fn enforce(
        &self,
        mut messages: Vec<Message>,
    ) -> (Vec<Message>, Option<CompressionReport>) {
        let total = self.counter.count(&messages);
        debug!(
            "Current context size: {total} tokens (max: {})",
            self.config.max_context_tokens
        );
        if total <= self.config.max_context_tokens {
            return (messages, None);
        }

        info!(
            "Context size ({total} tokens) exceeds max ({}), starting compression",
            self.config.max_context_tokens
        );

        let (candidates, eligible) = partition_candidates(&messages, self.config.keep_last_n);
        let mut report = CompressionReport {
            tokens_before: total,
            tokens_after: total,
            candidates,
            eligible: eligible.len(),
            ..Default::default()
        };
        if eligible.is_empty() {
            info!(
                "No messages to compress (keeping first + last {})",
                self.config.keep_last_n
            );
            return (messages, Some(report));
        }

        for idx in eligible {
            let message = &messages[idx];
            if message.compressed {
                debug!("Message {idx} already compressed, skipping");
                continue;
            }
            let tokens = self.counter.count_message(message);
            if tokens < self.config.min_compress_tokens {
                debug!(
                    "Message {idx} too small ({tokens} < {} tokens), skipping",
                    self.config.min_compress_tokens
                );
                continue;
            }

            let archived = match self.archive.archive(message, tokens, idx).await {
                Ok(r) => r,
                Err(e) => {
                    error!("Failed to archive message {idx}, leaving it uncompressed: {e}");
                    report.failed += 1;
                    continue;
                }
            };

            let message = &mut messages[idx];
            message.content = Some(placeholder(
                tokens,
                message.text(),
                self.config.preview_chars,
                &archived.locator,
            ));
            message.compressed = true;
            message.archive = Some(archived);
            report.compressed += 1;
        }

        report.tokens_after = self.counter.count(&messages);
        info!("{}", report.to_log_string());
        (messages, Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::archive::lookup;
    use crate::store::{AgentIdentity, SharedStore};
    use std::sync::Arc;

    /// One token per character, so sizes below are token counts.
    fn guard(config: CompressionConfig) -> ContextBudgetGuard {
        let archive = MessageArchive::new(
            Arc::new(SharedStore::new()),
            AgentIdentity::new("researcher", "t"),
            None,
        );
        ContextBudgetGuard::new(config, TokenCounter::fallback(1.0), archive)
    }

    fn sized(role_msg: fn(String) -> Message, n: usize) -> Message {
        role_msg("x".repeat(n))
    }

    fn user(n: usize) -> Message {
        sized(|s| Message::user(s), n)
    }

    fn tool(n: usize) -> Message {
        sized(|s| Message::tool_result("call", s), n)
    }

    fn flags(messages: &[Message]) -> Vec<bool> {
        messages.iter().map(|m| m.compressed).collect()
    }

    #[tokio::test]
    async fn under_budget_is_identity() {
        let g = guard(CompressionConfig::default().with_max_context_tokens(10_000));
        let messages = vec![Message::system("sys"), user(100), tool(5_000), user(100)];
        let (out, report) = g.enforce(messages.clone()).await;
        assert_eq!(out, messages);
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn five_message_scenario_compresses_single_eligible() {
        let g = guard(
            CompressionConfig::default()
                .with_max_context_tokens(10_000)
                .with_min_compress_tokens(500)
                .with_keep_last_n(1)
                .with_preview_chars(200),
        );
        let messages = vec![
            sized(|s| Message::system(s), 100),
            user(1_000),
            tool(9_000),
            sized(|s| Message::assistant_text(s), 900),
            user(1_000),
        ];
        assert_eq!(g.counter().count(&messages), 12_000);

        let (out, report) = g.enforce(messages.clone()).await;
        let report = report.unwrap();

        assert_eq!(flags(&out), vec![false, false, true, false, false]);
        assert_eq!(report.compressed, 1);
        assert_eq!(report.eligible, 1);
        for i in [0, 1, 3, 4] {
            assert_eq!(out[i], messages[i]);
        }

        let placeholder = out[2].text();
        assert!(placeholder.starts_with(COMPRESSED_TAG));
        assert!(placeholder.contains("Original size: 9000 tokens"));
        assert!(placeholder.contains(&format!("{}...", "x".repeat(200))));
    }

    #[tokio::test]
    async fn first_and_last_n_candidates_are_protected_regardless_of_size() {
        let g = guard(
            CompressionConfig::default()
                .with_max_context_tokens(100)
                .with_min_compress_tokens(1)
                .with_keep_last_n(2),
        );
        let messages = vec![
            Message::system("sys"),
            user(5_000),
            tool(5_000),
            Message::assistant_text("ok"),
            tool(5_000),
            user(5_000),
            tool(5_000),
        ];
        let (out, report) = g.enforce(messages).await;
        assert_eq!(
            flags(&out),
            vec![false, false, true, false, true, false, false]
        );
        assert_eq!(report.unwrap().compressed, 2);
    }

    #[tokio::test]
    async fn single_candidate_is_left_alone() {
        let g = guard(CompressionConfig::default().with_max_context_tokens(10));
        let messages = vec![Message::system("sys"), user(5_000), Message::assistant_text("a")];
        let (out, report) = g.enforce(messages.clone()).await;
        assert_eq!(out, messages);
        assert_eq!(report.unwrap().eligible, 0);
    }

    #[tokio::test]
    async fn small_messages_are_skipped() {
        let g = guard(
            CompressionConfig::default()
                .with_max_context_tokens(1_000)
                .with_min_compress_tokens(500)
                .with_keep_last_n(1),
        );
        let messages = vec![Message::system("s"), user(10), tool(499), tool(2_000), user(10)];
        let (out, _) = g.enforce(messages).await;
        assert_eq!(flags(&out), vec![false, false, false, true, false]);
    }

    #[tokio::test]
    async fn second_pass_never_recompresses() {
        let g = guard(
            CompressionConfig::default()
                .with_max_context_tokens(10)
                .with_min_compress_tokens(1)
                .with_keep_last_n(1),
        );
        let messages = vec![Message::system("s"), user(100), tool(3_000), tool(3_000), user(100)];
        let (once, first) = g.enforce(messages).await;
        assert_eq!(first.unwrap().compressed, 2);
        let archive_ids: Vec<_> = once.iter().map(|m| m.archive.clone()).collect();

        // Still over budget, but nothing new is eligible.
        let (twice, second) = g.enforce(once).await;
        assert_eq!(second.unwrap().compressed, 0);
        let again: Vec<_> = twice.iter().map(|m| m.archive.clone()).collect();
        assert_eq!(archive_ids, again);
    }

    #[tokio::test]
    async fn single_pass_may_remain_over_budget() {
        let g = guard(
            CompressionConfig::default()
                .with_max_context_tokens(1_000)
                .with_min_compress_tokens(10)
                .with_keep_last_n(1),
        );
        let messages = vec![Message::system("s"), user(5_000), tool(600), user(5_000)];
        let (_, report) = g.enforce(messages).await;
        let report = report.unwrap();
        assert_eq!(report.compressed, 1);
        assert!(report.tokens_after > 1_000);
        assert!(report.tokens_after < report.tokens_before);
    }

    #[tokio::test]
    async fn compressed_message_round_trips_through_store() {
        let g = guard(
            CompressionConfig::default()
                .with_max_context_tokens(10)
                .with_min_compress_tokens(1)
                .with_keep_last_n(1),
        );
        let original = Message::tool_result("call-7", "the full original search output");
        let messages = vec![Message::system("s"), user(5), original.clone(), user(5)];
        let (out, _) = g.enforce(messages).await;

        let reference = out[2].archive.clone().unwrap();
        let record = lookup(g.archive.store(), &reference).unwrap().unwrap();
        assert_eq!(record.original, original);
        assert_eq!(record.original_tokens, g.counter().count_message(&original));
        assert_eq!(record.source_index, 2);
    }

    #[tokio::test]
    async fn archive_failure_leaves_message_verbatim_and_continues() {
        let not_a_dir = tempfile::NamedTempFile::new().unwrap();
        let archive = MessageArchive::new(
            Arc::new(SharedStore::new()),
            AgentIdentity::default(),
            Some(not_a_dir.path().to_path_buf()),
        );
        let g = ContextBudgetGuard::new(
            CompressionConfig::default()
                .with_max_context_tokens(10)
                .with_min_compress_tokens(1)
                .with_keep_last_n(1),
            TokenCounter::fallback(1.0),
            archive,
        );
        let messages = vec![Message::system("s"), user(50), tool(50), tool(50), user(50)];
        let (out, report) = g.enforce(messages.clone()).await;
        let report = report.unwrap();
        assert_eq!(out, messages);
        assert_eq!(report.failed, 2);
        assert_eq!(report.compressed, 0);
    }

    #[test]
    fn preview_only_marks_truncation() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("exactly", 7), "exactly");
        assert_eq!(preview("truncated", 5), "trunc...");
        assert_eq!(preview("héllo wörld", 4), "héll...");
    }
}
