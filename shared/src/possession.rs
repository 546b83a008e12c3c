//! Possession records and the identifiers they are keyed by

use crate::math::{Pose, Quat, Transform, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connected participant, assigned by the server on connect
pub type ActorId = u32;

/// Per-record transition counter
pub type Generation = u64;

/// Client-chosen correlation id for request/response pairs
pub type RequestId = u32;

/// Stable identifier of a world object that can be possessed
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PossessableId(pub u64);

impl fmt::Display for PossessableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Named reference frame belonging to an actor
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct AnchorId(pub String);

impl AnchorId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn hand() -> Self {
        Self::new("hand")
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the prefab a possessable was spawned from
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct PrefabRef(pub String);

impl PrefabRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for PrefabRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Offset, rotation and scale applied when a possessable attaches to an anchor
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct AttachParams {
    pub offset: Vec3,
    /// Euler angles in degrees
    pub rotation: Vec3,
    pub scale: f32,
}

impl AttachParams {
    pub fn offset_pose(&self) -> Pose {
        Pose::new(self.offset, Quat::from_euler_degrees(self.rotation))
    }
}

impl Default for AttachParams {
    fn default() -> Self {
        Self {
            offset: Vec3::zero(),
            rotation: Vec3::zero(),
            scale: 1.0,
        }
    }
}

/// Where a duplicated possessable should appear
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Point(Pose),
    Anchor {
        actor: ActorId,
        anchor: AnchorId,
        params: AttachParams,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum PossessionState {
    Free,
    /// Reservation, not a grant
    Requested { actor: ActorId },
    Owned { actor: ActorId },
    Attached {
        actor: ActorId,
        anchor: AnchorId,
        params: AttachParams,
    },
}

/// Authoritative possession state for one possessable
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PossessionRecord {
    pub id: PossessableId,
    pub prefab: PrefabRef,
    pub state: PossessionState,
    pub generation: Generation,
    /// Resting presentation while free
    pub transform: Transform,
    /// Captured once when leaving `Free`, restored on return
    pub original: Option<Transform>,
    /// Generation of the grant that started the current ownership
    pub owned_since: Option<Generation>,
}

impl PossessionRecord {
    pub fn new(id: PossessableId, prefab: PrefabRef, transform: Transform) -> Self {
        Self {
            id,
            prefab,
            state: PossessionState::Free,
            generation: 0,
            transform,
            original: None,
            owned_since: None,
        }
    }

    /// Actor holding `Owned` or `Attached`
    pub fn owner(&self) -> Option<ActorId> {
        match self.state {
            PossessionState::Owned { actor } | PossessionState::Attached { actor, .. } => {
                Some(actor)
            }
            _ => None,
        }
    }

    /// Owner or reservation holder
    pub fn holder(&self) -> Option<ActorId> {
        match self.state {
            PossessionState::Requested { actor } => Some(actor),
            _ => self.owner(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == PossessionState::Free
    }

    /// Scale the object had before it was picked up
    pub fn base_scale(&self) -> Vec3 {
        self.original.unwrap_or(self.transform).scale
    }

    /// Moves to `next`, bumping the generation.
    ///
    /// The presentation snapshot is taken only when leaving `Free`; a record
    /// that becomes owned remembers the generation of that grant.
    pub fn transition(&mut self, next: PossessionState) -> Generation {
        if self.is_free() && next != PossessionState::Free {
            self.original = Some(self.transform);
        }
        let was_owned = self.owner().is_some();
        self.state = next;
        self.generation += 1;

        match self.state {
            PossessionState::Owned { .. } if !was_owned => {
                self.owned_since = Some(self.generation);
            }
            PossessionState::Free | PossessionState::Requested { .. } => {
                self.owned_since = None;
            }
            _ => {}
        }
        self.generation
    }

    /// Returns to `Free`, restoring the snapshot taken at pickup
    pub fn reset_to_free(&mut self) -> Generation {
        if let Some(original) = self.original.take() {
            self.transform = original;
        }
        self.transition(PossessionState::Free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PossessionRecord {
        PossessionRecord::new(
            PossessableId(42),
            PrefabRef::new("lantern"),
            Transform::new(Vec3::new(1.0, 2.0, 3.0), Quat::identity(), Vec3::new(0.5, 0.5, 0.5)),
        )
    }

    #[test]
    fn test_new_record_is_free() {
        let r = record();
        assert!(r.is_free());
        assert_eq!(r.generation, 0);
        assert_eq!(r.owner(), None);
        assert!(r.original.is_none());
    }

    #[test]
    fn test_transition_bumps_generation_and_snapshots_once() {
        let mut r = record();
        assert_eq!(r.transition(PossessionState::Owned { actor: 1 }), 1);
        assert_eq!(r.owned_since, Some(1));
        assert_eq!(r.original, Some(r.transform));

        r.transform.scale = Vec3::new(9.0, 9.0, 9.0);
        r.transition(PossessionState::Attached {
            actor: 1,
            anchor: AnchorId::hand(),
            params: AttachParams::default(),
        });
        assert_eq!(r.generation, 2);
        assert_eq!(r.owned_since, Some(1));
        assert_eq!(r.original.unwrap().scale, Vec3::new(0.5, 0.5, 0.5));
    }

    #[test]
    fn test_reset_restores_snapshot() {
        let mut r = record();
        let before = r.transform;
        r.transition(PossessionState::Owned { actor: 3 });
        r.transform = Transform::at(Vec3::new(100.0, 0.0, 0.0));

        assert_eq!(r.reset_to_free(), 2);
        assert_eq!(r.transform, before);
        assert!(r.original.is_none());
        assert!(r.owned_since.is_none());
        assert!(r.is_free());
    }

    #[test]
    fn test_owner_and_holder() {
        let mut r = record();
        r.transition(PossessionState::Requested { actor: 7 });
        assert_eq!(r.owner(), None);
        assert_eq!(r.holder(), Some(7));

        r.transition(PossessionState::Owned { actor: 7 });
        assert_eq!(r.owner(), Some(7));
        assert_eq!(r.owned_since, Some(2));
    }

    #[test]
    fn test_base_scale_prefers_snapshot() {
        let mut r = record();
        r.transition(PossessionState::Owned { actor: 1 });
        r.transform.scale = Vec3::one();
        assert_eq!(r.base_scale(), Vec3::new(0.5, 0.5, 0.5));
    }

    #[test]
    fn test_offset_pose_uses_degrees() {
        let params = AttachParams {
            offset: Vec3::new(0.0, 0.0, 1.0),
            rotation: Vec3::new(0.0, 180.0, 0.0),
            scale: 1.0,
        };
        let pose = params.offset_pose();
        let forward = pose.rotation.rotate(Vec3::new(0.0, 0.0, 1.0));
        assert!((forward.z + 1.0).abs() < 1e-5);
    }
}
