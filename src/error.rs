//! Error types for the governance engine.

use crate::types::{AgentId, RiskLevel};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rejection reasons for ledger mutations and failures found by `verify`.
///
/// Every variant is fatal to the single append that produced it and never to
/// the ledger as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerError {
    /// Declared previous-hash does not match the hash of the preceding trace
    ChainMismatch { position: usize, expected: String, found: String },
    /// Signature does not verify against the signer's registered key
    SignatureInvalid { position: usize, reason: String },
    /// Timestamp precedes the last recorded timestamp of the same agent
    NonMonotonicTimestamp { agent: AgentId, previous: u64, attempted: u64 },
    /// (agent, nonce) pair was already accepted
    ReplayedNonce { agent: AgentId, nonce: u64 },
    /// Trace's action reference does not hash-match the stored action
    ActionRefMismatch { position: usize },
    /// No public key is registered for the claimed signer
    UnknownSigner { agent: AgentId },
    /// Agent already has a different signing key registered
    KeyConflict { agent: AgentId },
    /// Requested range exceeds the ledger
    RangeOutOfBounds { start: usize, end: usize, len: usize },
    /// Journal read or write failed
    Journal { message: String },
    /// Lock acquisition failed (thread safety)
    LockPoisoned,
}

impl LedgerError {
    /// Position of the offending trace, when the error is tied to one.
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::ChainMismatch { position, .. }
            | Self::SignatureInvalid { position, .. }
            | Self::ActionRefMismatch { position } => Some(*position),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChainMismatch { position, expected, found } => {
                write!(f, "chain mismatch at position {}: expected previous '{}', found '{}'",
                       position, expected, found)
            }
            Self::SignatureInvalid { position, reason } => {
                write!(f, "invalid signature at position {}: {}", position, reason)
            }
            Self::NonMonotonicTimestamp { agent, previous, attempted } => {
                write!(f, "timestamp {} for agent '{}' precedes last recorded {}",
                       attempted, agent, previous)
            }
            Self::ReplayedNonce { agent, nonce } => {
                write!(f, "nonce {} already used by agent '{}'", nonce, agent)
            }
            Self::ActionRefMismatch { position } => {
                write!(f, "action reference mismatch at position {}", position)
            }
            Self::UnknownSigner { agent } => {
                write!(f, "no signing key registered for agent '{}'", agent)
            }
            Self::KeyConflict { agent } => {
                write!(f, "agent '{}' already has a different signing key registered", agent)
            }
            Self::RangeOutOfBounds { start, end, len } => {
                write!(f, "range {}..{} out of bounds for ledger of length {}", start, end, len)
            }
            Self::Journal { message } => write!(f, "journal error: {}", message),
            Self::LockPoisoned => write!(f, "ledger lock poisoned"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        Self::Journal { message: e.to_string() }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Journal { message: e.to_string() }
    }
}

impl<T> From<std::sync::PoisonError<T>> for LedgerError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned
    }
}

/// Unified error type for engine operations outside the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum GovernanceError {
    /// Validation error with field context
    Validation { field: String, message: String },
    /// Intent DSL or predicate parsing error
    Parse { source: String, message: String },
    /// Agent is not present in the fact store
    AgentNotFound { agent: AgentId },
    /// Agent identity is already registered and cannot be reassigned
    DuplicateAgent { agent: AgentId },
    /// Liability record id is already registered
    DuplicateLiability { liability: String },
    /// Agent's risk level is below the admission floor
    AgentBlocked { agent: AgentId, level: RiskLevel, minimum: RiskLevel },
    /// Rejected ledger mutation
    Ledger(LedgerError),
    /// Serialization error
    Serialization { message: String },
    /// Lock acquisition failed (thread safety)
    LockPoisoned { resource: String },
}

impl fmt::Display for GovernanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { field, message } => {
                write!(f, "validation error on '{}': {}", field, message)
            }
            Self::Parse { source, message } => {
                write!(f, "parse error in '{}': {}", source, message)
            }
            Self::AgentNotFound { agent } => write!(f, "agent '{}' not found", agent),
            Self::DuplicateAgent { agent } => {
                write!(f, "agent '{}' is already registered", agent)
            }
            Self::DuplicateLiability { liability } => {
                write!(f, "liability '{}' is already registered", liability)
            }
            Self::AgentBlocked { agent, level, minimum } => {
                write!(f, "agent '{}' blocked: risk level {} is below {}", agent, level, minimum)
            }
            Self::Ledger(e) => write!(f, "ledger rejected mutation: {}", e),
            Self::Serialization { message } => {
                write!(f, "serialization error: {}", message)
            }
            Self::LockPoisoned { resource } => {
                write!(f, "lock poisoned for resource: {}", resource)
            }
        }
    }
}

impl std::error::Error for GovernanceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ledger(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for engine operations.
pub type GovResult<T> = Result<T, GovernanceError>;

impl From<LedgerError> for GovernanceError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}

impl From<serde_json::Error> for GovernanceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization { message: e.to_string() }
    }
}

impl<T> From<std::sync::PoisonError<T>> for GovernanceError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned { resource: "rwlock".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_error_position() {
        let e = LedgerError::SignatureInvalid { position: 3, reason: "bad".into() };
        assert_eq!(e.position(), Some(3));
        assert_eq!(LedgerError::LockPoisoned.position(), None);
    }

    #[test]
    fn governance_error_wraps_ledger_error() {
        let e: GovernanceError = LedgerError::ActionRefMismatch { position: 1 }.into();
        assert!(matches!(e, GovernanceError::Ledger(_)));
        assert!(e.to_string().contains("position 1"));
    }
}
