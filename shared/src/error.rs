use crate::possession::{ActorId, PossessableId, PrefabRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a possession request was refused, as carried on the wire
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    AlreadyHeld,
    Unknown,
    NotOwner,
    Full,
    Occupied,
    VerificationTimeout,
    TimedOut,
}

/// Every way a possession operation can fail.
///
/// None of these are fatal: callers recover by leaving local state consistent
/// with "not holding" and waiting for the next authoritative broadcast.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PossessionError {
    #[error("possessable {id} is already held by actor {holder}")]
    AlreadyHeld { id: PossessableId, holder: ActorId },
    #[error("possessable {0} is not registered")]
    Unknown(PossessableId),
    #[error("prefab '{0}' is not in the catalog")]
    UnknownPrefab(PrefabRef),
    #[error("actor {actor} does not own possessable {id}")]
    NotOwner { id: PossessableId, actor: ActorId },
    #[error("ownership of {0} could not be verified in time")]
    VerificationTimeout(PossessableId),
    #[error("actor {actor} has no free capacity")]
    Full { actor: ActorId },
    #[error("mirror group {group} is occupied")]
    Occupied { group: String },
    #[error("request for {0} timed out")]
    TimedOut(PossessableId),
}

impl PossessionError {
    pub fn reason(&self) -> DenyReason {
        match self {
            PossessionError::AlreadyHeld { .. } => DenyReason::AlreadyHeld,
            PossessionError::Unknown(_) | PossessionError::UnknownPrefab(_) => {
                DenyReason::Unknown
            }
            PossessionError::NotOwner { .. } => DenyReason::NotOwner,
            PossessionError::VerificationTimeout(_) => DenyReason::VerificationTimeout,
            PossessionError::Full { .. } => DenyReason::Full,
            PossessionError::Occupied { .. } => DenyReason::Occupied,
            PossessionError::TimedOut(_) => DenyReason::TimedOut,
        }
    }
}
