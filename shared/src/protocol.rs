//! Wire protocol between the server and its clients.
//!
//! Every datagram carries exactly one bincode-encoded [`Packet`]. Broadcasts
//! about a possessable always carry the record's generation so receivers can
//! drop reordered or duplicated deliveries.

use crate::error::DenyReason;
use crate::math::{Pose, Quat, Transform, Vec3};
use crate::possession::{
    ActorId, AnchorId, AttachParams, Generation, PossessableId, PossessionRecord, PrefabRef,
    RequestId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client -> server
    Connect {
        client_version: u32,
    },
    Heartbeat,
    Disconnect,
    RequestPossession {
        request_id: RequestId,
        id: PossessableId,
        actor: ActorId,
    },
    ReleasePossession {
        request_id: RequestId,
        id: PossessableId,
        actor: ActorId,
        consume: bool,
    },
    AttachToAnchor {
        id: PossessableId,
        actor: ActorId,
        anchor: AnchorId,
        params: AttachParams,
    },
    ReservePossession {
        id: PossessableId,
        actor: ActorId,
    },
    Relocate {
        id: PossessableId,
        actor: ActorId,
        pose: Pose,
    },
    SendToMirror {
        request_id: RequestId,
        source: PossessableId,
        group: String,
    },

    // Server -> client
    Connected {
        actor: ActorId,
    },
    Disconnected {
        reason: String,
    },
    RecordSync {
        record: PossessionRecord,
    },
    Grant {
        request_id: RequestId,
        id: PossessableId,
        actor: ActorId,
        generation: Generation,
    },
    Denied {
        request_id: RequestId,
        id: PossessableId,
        reason: DenyReason,
    },
    Ack {
        request_id: RequestId,
        id: PossessableId,
        generation: Generation,
    },
    Reserved {
        id: PossessableId,
        actor: ActorId,
        generation: Generation,
    },
    AttachBroadcast(AttachUpdate),
    ReleaseBroadcast {
        id: PossessableId,
        generation: Generation,
        transform: Transform,
        consumed: bool,
    },
    RelocateBroadcast {
        id: PossessableId,
        pose: Pose,
        generation: Generation,
    },
    DuplicateBroadcast {
        request_id: RequestId,
        new_id: PossessableId,
        source_prefab: PrefabRef,
        position: Vec3,
        rotation: Quat,
        scale: Vec3,
        generation: Generation,
    },
}

impl Packet {
    /// Possessable the packet is about, if any
    pub fn possessable(&self) -> Option<PossessableId> {
        match self {
            Packet::RequestPossession { id, .. }
            | Packet::ReleasePossession { id, .. }
            | Packet::AttachToAnchor { id, .. }
            | Packet::ReservePossession { id, .. }
            | Packet::Relocate { id, .. }
            | Packet::Grant { id, .. }
            | Packet::Denied { id, .. }
            | Packet::Ack { id, .. }
            | Packet::Reserved { id, .. }
            | Packet::ReleaseBroadcast { id, .. }
            | Packet::RelocateBroadcast { id, .. } => Some(*id),
            Packet::SendToMirror { source, .. } => Some(*source),
            Packet::RecordSync { record } => Some(record.id),
            Packet::AttachBroadcast(update) => Some(update.id),
            Packet::DuplicateBroadcast { new_id, .. } => Some(*new_id),
            Packet::Connect { .. }
            | Packet::Heartbeat
            | Packet::Disconnect
            | Packet::Connected { .. }
            | Packet::Disconnected { .. } => None,
        }
    }

    /// Actor a client-originated packet claims to act for
    pub fn claimed_actor(&self) -> Option<ActorId> {
        match self {
            Packet::RequestPossession { actor, .. }
            | Packet::ReleasePossession { actor, .. }
            | Packet::AttachToAnchor { actor, .. }
            | Packet::ReservePossession { actor, .. }
            | Packet::Relocate { actor, .. } => Some(*actor),
            _ => None,
        }
    }
}

/// Attachment parameters broadcast so every follower configures identically
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttachUpdate {
    pub id: PossessableId,
    pub actor: ActorId,
    pub anchor: AnchorId,
    pub params: AttachParams,
    /// Scale the object had before pickup
    pub base_scale: Vec3,
    /// Generation of the grant this attachment belongs to
    pub owned_since: Generation,
    pub generation: Generation,
}
