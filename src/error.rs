//! Errors raised while resolving checks.
//!
//! Every failure a client can hit is recoverable: the caller retries,
//! re-rolls, or cancels. `ErrorKind` lets the UI tell validation problems,
//! missing entities, resolution conflicts and lifecycle misuse apart.

use crate::check::InstanceId;
use crate::turn::TurnPhase;

/// Broad classes of check failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unmet requirement; nothing was mutated and the check may be retried.
    Validation,
    /// An instance, definition or settlement could not be found.
    MissingEntity,
    /// Another client holds the resolution lock.
    Conflict,
    /// An operation was attempted out of lifecycle order.
    Lifecycle,
}

impl ErrorKind {
    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::MissingEntity => "missing",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Lifecycle => "lifecycle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    #[error("requirements not met: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("'{check_id}' can only be resolved during the {expected} phase")]
    WrongPhase { check_id: String, expected: TurnPhase },

    #[error("skill '{skill}' cannot be used for '{check_id}'")]
    SkillNotAllowed { check_id: String, skill: String },

    #[error("check instance '{0}' not found")]
    MissingInstance(InstanceId),

    #[error("no '{0}' check is in progress")]
    NotInProgress(String),

    #[error("unknown check '{0}'")]
    MissingDefinition(String),

    #[error("unknown settlement '{0}'")]
    MissingSettlement(String),

    #[error("'{check_id}' is being resolved by {holder}")]
    Conflict { check_id: String, holder: String },

    #[error("instance '{0}' has no outcome to apply")]
    NoOutcome(InstanceId),

    #[error("instance '{0}' is not marked applied")]
    NotApplied(InstanceId),

    #[error("instance '{0}' is already applied")]
    AlreadyApplied(InstanceId),

    #[error("effects for instance '{0}' were already committed")]
    AlreadyCommitted(InstanceId),

    #[error("aid for '{check_id}' was rolled in the {phase} phase of turn {turn}, which is over")]
    StaleAid {
        check_id: String,
        turn: u32,
        phase: TurnPhase,
    },

    #[error("'{0}' was ignored and its outcome cannot be overridden")]
    IgnoredOverride(String),
}

impl CheckError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckError::Validation(_)
            | CheckError::WrongPhase { .. }
            | CheckError::SkillNotAllowed { .. } => ErrorKind::Validation,
            CheckError::MissingInstance(_)
            | CheckError::NotInProgress(_)
            | CheckError::MissingDefinition(_)
            | CheckError::MissingSettlement(_) => ErrorKind::MissingEntity,
            CheckError::Conflict { .. } => ErrorKind::Conflict,
            CheckError::NoOutcome(_)
            | CheckError::NotApplied(_)
            | CheckError::AlreadyApplied(_)
            | CheckError::AlreadyCommitted(_)
            | CheckError::StaleAid { .. }
            | CheckError::IgnoredOverride(_) => ErrorKind::Lifecycle,
        }
    }
}
