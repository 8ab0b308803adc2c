//! Error types for graph construction and scheduling.

use thiserror::Error;

/// Which class of failure a [`ShiftError`] belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input: an address out of range, a conflicting link, malformed data.
    Structural,
    /// The constraints and links contain a cycle.
    Cycle,
    /// A defect in the scheduler itself, surfaced by debug checks.
    InternalInvariant,
}

/// Errors that can occur while building or scheduling a graph.
#[derive(Error, Debug)]
pub enum ShiftError {
    #[error("Op address {address} is out of range, there are only {n_ops} Ops")]
    OpOutOfRange { address: usize, n_ops: usize },

    #[error("Alloc address {address} is out of range, there are only {n_allocs} Allocs")]
    AllocOutOfRange { address: usize, n_allocs: usize },

    #[error("Cannot constrain Op {0} to be before itself")]
    SelfConstraint(usize),

    #[error("Cannot link {before} -> {after}: Op {existing_owner} already has a {direction} link to {existing}")]
    LinkConflict {
        before: usize,
        after: usize,
        existing_owner: usize,
        existing: usize,
        direction: &'static str,
    },

    #[error("Length mismatch in {context}: {left} vs {right}")]
    LengthMismatch {
        context: &'static str,
        left: usize,
        right: usize,
    },

    #[error("Duplicate Op address {0}")]
    DuplicateOp(usize),

    #[error("Tier {0} is outside the supported range [-3, 3]")]
    InvalidTier(i64),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Failed to parse serialized graph: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed serialized graph: {0}")]
    MalformedGraph(String),

    #[error("Only {scheduled} of {total} Ops could be scheduled, there is a cycle in the graph")]
    Cycle { scheduled: usize, total: usize },

    #[error("Constraint {from} -> {to} points backwards along the chain of {to}, there is a cycle in the graph")]
    ChainCycle { from: usize, to: usize },

    #[error("Weight {0} is not finite")]
    NonFiniteWeight(f64),

    #[error("Ripple and simple cost evaluation disagree at start {start}, window {n_to_shift}: {details}")]
    RippleMismatch {
        start: usize,
        n_to_shift: usize,
        details: String,
    },

    #[error("Schedule state is inconsistent: {0}")]
    Correctness(String),

    #[error("Accumulated improvements {accumulated} do not match the liveness change {observed}")]
    LivenessDrift { accumulated: String, observed: String },
}

impl ShiftError {
    /// The taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cycle { .. } | Self::ChainCycle { .. } => ErrorKind::Cycle,
            Self::RippleMismatch { .. } | Self::Correctness(_) | Self::LivenessDrift { .. } => {
                ErrorKind::InternalInvariant
            }
            _ => ErrorKind::Structural,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ShiftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ShiftError::SelfConstraint(3).kind(), ErrorKind::Structural);
        assert_eq!(
            ShiftError::Cycle {
                scheduled: 1,
                total: 3
            }
            .kind(),
            ErrorKind::Cycle
        );
        assert_eq!(
            ShiftError::ChainCycle { from: 2, to: 0 }.kind(),
            ErrorKind::Cycle
        );
        assert_eq!(
            ShiftError::Correctness("opToSch".to_string()).kind(),
            ErrorKind::InternalInvariant
        );
    }

    #[test]
    fn test_error_messages() {
        let err = ShiftError::OpOutOfRange {
            address: 7,
            n_ops: 3,
        };
        assert_eq!(
            err.to_string(),
            "Op address 7 is out of range, there are only 3 Ops"
        );
    }

    #[test]
    fn test_serde_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: ShiftError = parse.unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }
}
