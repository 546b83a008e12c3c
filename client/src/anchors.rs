//! Where each actor's anchors are right now

use shared::{ActorId, AnchorId, Pose};
use std::collections::HashMap;

/// Supplies world poses for actor anchors
pub trait AnchorSource {
    fn anchor_pose(&self, actor: ActorId, anchor: &AnchorId) -> Option<Pose>;
}

/// Map-backed anchor source fed by the local character and the scene
#[derive(Debug, Default, Clone)]
pub struct AnchorBoard {
    poses: HashMap<(ActorId, AnchorId), Pose>,
}

impl AnchorBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, actor: ActorId, anchor: AnchorId, pose: Pose) {
        self.poses.insert((actor, anchor), pose);
    }

    pub fn remove_actor(&mut self, actor: ActorId) {
        self.poses.retain(|(owner, _), _| *owner != actor);
    }
}

impl AnchorSource for AnchorBoard {
    fn anchor_pose(&self, actor: ActorId, anchor: &AnchorId) -> Option<Pose> {
        self.poses.get(&(actor, anchor.clone())).copied()
    }
}
