//! # Shared Possession Types
//!
//! Types understood by both the server and every client: identifiers, the
//! authoritative [`PossessionRecord`], the wire [`Packet`] and the error
//! vocabulary used to refuse requests.
//!
//! ## Generations
//!
//! Every transition of a record bumps its generation. Receivers keep the
//! highest generation they have seen per possessable and discard anything
//! that is not newer, so the transport is free to reorder, duplicate or drop
//! datagrams without corrupting anyone's view.
//!
//! ## Modules
//!
//! - `math`: vectors, quaternions and the pose composition used for anchors
//! - `possession`: ids, attachment parameters and the record state machine
//! - `protocol`: the bincode packet enum exchanged over UDP
//! - `error`: [`PossessionError`] and its wire form [`DenyReason`]
//! - `config`: timeouts, protocol version and per-binary settings

pub mod config;
pub mod error;
pub mod math;
pub mod possession;
pub mod protocol;

pub use config::{ClientConfig, ServerConfig, TimeoutPolicy, PROTOCOL_VERSION};
pub use error::{DenyReason, PossessionError};
pub use math::{Pose, Quat, Transform, Vec3};
pub use possession::{
    ActorId, AnchorId, AttachParams, Destination, Generation, PossessableId, PossessionRecord,
    PossessionState, PrefabRef, RequestId,
};
pub use protocol::{AttachUpdate, Packet};
