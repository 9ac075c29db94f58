//! Configuration for a similarity run.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_GROUP_SIZE;
use crate::error::{Result, SimilarityError};

/// Configuration for a similarity run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Documents per group.
    pub group_size: usize,

    /// When to commit written entries.
    pub commit: CommitPolicy,

    /// How inserts treat an already persisted pair.
    pub write_mode: WriteMode,

    /// Retry behaviour for transient store failures.
    pub retry: RetryPolicy,

    /// Skip group pairs recorded as complete by an earlier run.
    pub resume: bool,

    /// Group-pair matrices computed concurrently ahead of the writer.
    pub max_in_flight: usize,
}

impl SimilarityConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            group_size: DEFAULT_GROUP_SIZE,
            commit: CommitPolicy::default(),
            write_mode: WriteMode::default(),
            retry: RetryPolicy::default(),
            resume: false,
            max_in_flight: 1,
        }
    }

    /// Set the group size.
    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size;
        self
    }

    /// Set the commit policy.
    pub fn with_commit(mut self, commit: CommitPolicy) -> Self {
        self.commit = commit;
        self
    }

    /// Set the write mode.
    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable or disable resuming from recorded progress.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Set how many group-pair matrices may be computed concurrently.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject configurations the pipeline cannot run correctly.
    pub fn validate(&self) -> Result<()> {
        if self.group_size == 0 {
            return Err(SimilarityError::InvalidConfiguration(
                "group size must be positive".to_string(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(SimilarityError::InvalidConfiguration(
                "max_in_flight must be positive".to_string(),
            ));
        }
        if let CommitPolicy::EveryN { entries: 0 } = self.commit {
            return Err(SimilarityError::InvalidConfiguration(
                "every_n commit policy needs a positive entry count".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SimilarityError::InvalidConfiguration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        // A pair's entries and its progress record must land together, or
        // rewriting the pair has to be harmless.
        if self.resume
            && self.write_mode == WriteMode::Append
            && !matches!(
                self.commit,
                CommitPolicy::PerGroupPair | CommitPolicy::EndOfRun
            )
        {
            return Err(SimilarityError::InvalidConfiguration(format!(
                "resume with append writes requires the per_group_pair or end_of_run commit policy, got {}",
                self.commit
            )));
        }
        Ok(())
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// When the writer commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Commit after every entry.
    PerEntry,
    /// Commit after every `entries` entries.
    EveryN { entries: usize },
    /// Commit once each group pair is fully written.
    #[default]
    PerGroupPair,
    /// Commit once at the end of the run.
    EndOfRun,
}

impl std::fmt::Display for CommitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerEntry => f.write_str("per_entry"),
            Self::EveryN { entries } => write!(f, "every_n({entries})"),
            Self::PerGroupPair => f.write_str("per_group_pair"),
            Self::EndOfRun => f.write_str("end_of_run"),
        }
    }
}

impl std::str::FromStr for CommitPolicy {
    type Err = SimilarityError;

    /// Parses `per_entry`, `per_group_pair`, `end_of_run` or `every_n:<k>`.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "per_entry" => Ok(Self::PerEntry),
            "per_group_pair" => Ok(Self::PerGroupPair),
            "end_of_run" => Ok(Self::EndOfRun),
            other => {
                let entries = other
                    .strip_prefix("every_n:")
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(|| {
                        SimilarityError::InvalidConfiguration(format!(
                            "unknown commit policy: {other}"
                        ))
                    })?;
                Ok(Self::EveryN { entries })
            }
        }
    }
}

/// How an insert treats a pair that is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Fail loudly on an existing pair.
    #[default]
    Append,
    /// Replace the existing score.
    Upsert,
}

/// Retry schedule for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per operation, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_backoff_ms: u64,

    /// Upper bound on the delay between retries.
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), doubling each time.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}
