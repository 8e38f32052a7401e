use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::run::Stage;
use crate::article::{GenerationError, ReviewError};
use crate::config::ConfigError;
use crate::publish::{IdempotencyToken, PublishError};

/// Failure of a single stage attempt.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

impl StageError {
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Generation(err) => err.is_retriable(),
            Self::Review(err) => err.is_retriable(),
            Self::Publish(err) => err.is_retriable(),
            Self::Timeout(_) => true,
        }
    }

    /// A publish attempt that timed out or lost its create response may
    /// still have written the post.
    pub fn may_have_created(&self) -> bool {
        match self {
            Self::Publish(err) => err.may_have_created(),
            Self::Timeout(_) => true,
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Generation(_) => "generation",
            Self::Review(_) => "review",
            Self::Publish(err) if err.is_authentication() => "authentication",
            Self::Publish(_) => "publish",
            Self::Timeout(_) => "timeout",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AmbiguityReason {
    Cancelled,
    TimedOut(Duration),
    /// An earlier attempt may have created the post before a later one failed.
    Unconfirmed,
}

impl fmt::Display for AmbiguityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("the run was cancelled while publishing"),
            Self::TimedOut(after) => {
                write!(f, "the last publish attempt timed out after {after:?}")
            }
            Self::Unconfirmed => {
                f.write_str("an earlier publish attempt may have created the post")
            }
        }
    }
}

/// Outcome of a run that did not produce a post.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Config(#[from] ConfigError),
    #[error("stage {stage} failed after {attempts} attempt(s): {source}")]
    StageFailed {
        stage: Stage,
        attempts: u32,
        #[source]
        source: StageError,
    },
    /// The post may or may not exist. Retrying with `token` is safe.
    #[error("publish outcome unknown ({reason}); retry with idempotency token {token}")]
    AmbiguousOutcome {
        token: IdempotencyToken,
        reason: AmbiguityReason,
    },
    #[error("run cancelled during {stage}")]
    Cancelled { stage: Stage },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Config(_) => Stage::Pending,
            Self::StageFailed { stage, .. } => *stage,
            Self::AmbiguousOutcome { .. } => Stage::Publishing,
            Self::Cancelled { stage } => *stage,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::StageFailed { source, .. } => source.kind(),
            Self::AmbiguousOutcome { .. } => "ambiguous_outcome",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    pub fn token(&self) -> Option<&IdempotencyToken> {
        match self {
            Self::AmbiguousOutcome { token, .. } => Some(token),
            _ => None,
        }
    }
}
