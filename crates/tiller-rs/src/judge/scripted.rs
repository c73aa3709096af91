//! In-memory judge that replays canned replies. Used for dry runs and tests.

use super::{JudgeError, JudgeFuture, SecondaryJudge};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays queued replies in order and records every prompt it receives.
///
/// Once the queue is drained, each call returns [`JudgeError::Empty`].
#[derive(Debug, Default)]
pub struct ScriptedJudge {
    replies: Mutex<VecDeque<Result<String, JudgeError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedJudge {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(reply.into()));
    }

    /// Queue a failed call.
    pub fn push_error(&self, error: JudgeError) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(error));
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of calls made.
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl SecondaryJudge for ScriptedJudge {
    fn run(&self, prompt: &str) -> JudgeFuture<'_> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Err(JudgeError::Empty));
        Box::pin(async move { reply })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
