//! Context window management: token counting, the pre-turn budget guard,
//! and the archive of compressed messages.
//!
//! 1. **[`tokens`]**: [`TokenCounter`] measures messages with an exact BPE
//!    tokenizer, or a character-ratio estimate when no tokenizer is available.
//!
//! 2. **[`guard`]**: [`ContextBudgetGuard`] replaces older user/tool messages
//!    with placeholders once the conversation exceeds its budget. The first
//!    user/tool message and the most recent `keep_last_n` are pinned.
//!
//! 3. **[`archive`]**: [`MessageArchive`] stores the originals so a
//!    placeholder can always be traced back to what it replaced.

pub mod archive;
pub mod guard;
pub mod tokens;

pub use archive::{ArchiveError, CompressionRecord, MessageArchive};
pub use guard::{CompressionConfig, CompressionReport, ContextBudgetGuard};
pub use tokens::{TokenCounter, TokenStrategy};
