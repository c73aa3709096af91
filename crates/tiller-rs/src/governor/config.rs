//! Governor configuration.
//!
//! [`GovernorConfig`] groups the thresholds of every policy. It is plain
//! data: build it in code with the `with_*` helpers, or load a JSON file
//! where any subset of fields may be given and the rest take their defaults.
//! [`GovernorConfig::validate`] runs once when the governor is built; the
//! config is immutable afterwards.
//!
//! ```json
//! {
//!   "compression": { "max_context_tokens": 64000, "keep_last_n": 2 },
//!   "plan_validation": { "validate_every_n": 2 },
//!   "judge": { "timeout_secs": 30 }
//! }
//! ```

use crate::context::guard::CompressionConfig;
use crate::context::tokens::{DEFAULT_CHARS_PER_TOKEN, DEFAULT_TOKENIZER_MODEL, TokenStrategy};
use crate::judge::transcript::Truncation;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Invalid or missing configuration. Fatal at construction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
    #[error("no {0} judge configured")]
    MissingJudge(&'static str),
    #[error("{0} not set")]
    MissingApiKey(&'static str),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Token counting strategy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TokenizerConfig {
    pub strategy: TokenStrategy,
    /// Model id the BPE encoding is resolved from.
    pub model: String,
    /// Ratio used by the fallback estimate.
    pub chars_per_token: f64,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            strategy: TokenStrategy::Tiktoken,
            model: DEFAULT_TOKENIZER_MODEL.to_string(),
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

/// Plan-mutation validation throttle and ceiling.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PlanValidationConfig {
    /// Validate every Nth plan-mutation turn (after the skipped ones).
    pub validate_every_n: u32,
    /// Plan-mutation turns that pass unvalidated at the start of a run.
    pub skip_first_n: u32,
    /// Judge calls allowed per run.
    pub max_validations: u32,
}

impl Default for PlanValidationConfig {
    fn default() -> Self {
        Self {
            validate_every_n: 1,
            skip_first_n: 0,
            max_validations: 10,
        }
    }
}

/// Termination arbitration ceiling.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ContinuationConfig {
    /// Completeness judge calls allowed per run. Once spent, termination is
    /// allowed without asking.
    pub max_continuations: u32,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            max_continuations: 5,
        }
    }
}

/// Judge call settings shared by both post-turn policies.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct JudgeConfig {
    pub timeout_secs: u64,
    pub truncation: Truncation,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            truncation: Truncation::default(),
        }
    }
}

impl JudgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Every threshold the governor uses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct GovernorConfig {
    pub compression: CompressionConfig,
    pub tokenizer: TokenizerConfig,
    pub plan_validation: PlanValidationConfig,
    pub continuation: ContinuationConfig,
    pub judge: JudgeConfig,
    /// Root for archive files. When unset, the store's workspace key is
    /// used, and if that is unset too, archives live only in the store.
    pub archive_dir: Option<PathBuf>,
}

impl GovernorConfig {
    /// Load from a JSON file. Missing fields take their defaults. The result
    /// is validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no policy can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });
        if self.compression.max_context_tokens == 0 {
            return invalid("compression.max_context_tokens", "must be positive");
        }
        if self.plan_validation.validate_every_n == 0 {
            return invalid("plan_validation.validate_every_n", "must be positive");
        }
        if self.judge.truncation.head_chars == 0 || self.judge.truncation.tail_chars == 0 {
            return invalid("judge.truncation", "head and tail must be positive");
        }
        let truncation = &self.judge.truncation;
        if truncation.head_chars.checked_add(truncation.tail_chars).is_none() {
            return invalid("judge.truncation", "head plus tail overflows");
        }
        if self.judge.timeout_secs == 0 {
            return invalid("judge.timeout_secs", "must be positive");
        }
        if !(self.tokenizer.chars_per_token.is_finite() && self.tokenizer.chars_per_token > 0.0) {
            return invalid("tokenizer.chars_per_token", "must be a positive number");
        }
        Ok(())
    }

    pub fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.compression.max_context_tokens = tokens;
        self
    }

    pub fn with_keep_last_n(mut self, n: usize) -> Self {
        self.compression.keep_last_n = n;
        self
    }

    pub fn with_min_compress_tokens(mut self, tokens: usize) -> Self {
        self.compression.min_compress_tokens = tokens;
        self
    }

    pub fn with_tokenizer(mut self, strategy: TokenStrategy, chars_per_token: f64) -> Self {
        self.tokenizer.strategy = strategy;
        self.tokenizer.chars_per_token = chars_per_token;
        self
    }

    pub fn with_validation_cadence(mut self, every_n: u32, skip_first_n: u32) -> Self {
        self.plan_validation.validate_every_n = every_n;
        self.plan_validation.skip_first_n = skip_first_n;
        self
    }

    pub fn with_max_validations(mut self, max: u32) -> Self {
        self.plan_validation.max_validations = max;
        self
    }

    pub fn with_max_continuations(mut self, max: u32) -> Self {
        self.continuation.max_continuations = max;
        self
    }

    /// The timeout is kept in whole seconds; any fraction rounds up.
    pub fn with_judge_timeout(mut self, timeout: Duration) -> Self {
        let partial = u64::from(timeout.subsec_nanos() > 0);
        self.judge.timeout_secs = timeout.as_secs().saturating_add(partial);
        self
    }

    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }
}
