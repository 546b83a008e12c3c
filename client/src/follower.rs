//! Client-side view of possession records and the attachment follower
//!
//! Every participant keeps a read-only projection of the records it has
//! heard about. Anything not newer than the projection is discarded, so
//! reordered and duplicated datagrams are harmless.
//!
//! When an attach names the local actor the follower creates a binding, but
//! it will not move the object until it has seen the grant that started the
//! ownership. If that grant does not show up within the verification window
//! the configured `TimeoutPolicy` decides what happens. Attachments of other
//! actors only ever update the projection.

use crate::anchors::AnchorSource;
use log::{debug, info, warn};
use shared::{
    ActorId, AnchorId, AttachParams, AttachUpdate, ClientConfig, Generation, Packet, Pose,
    PossessableId, PossessionRecord, PossessionState, PrefabRef, TimeoutPolicy, Transform, Vec3,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Last state observed for one possessable
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub generation: Generation,
    pub owner: Option<ActorId>,
    pub reserved_by: Option<ActorId>,
    pub attachment: Option<(AnchorId, AttachParams)>,
    /// Resting transform while free
    pub transform: Transform,
    pub prefab: Option<PrefabRef>,
    pub despawned: bool,
}

impl Observation {
    fn free(generation: Generation, transform: Transform) -> Self {
        Self {
            generation,
            owner: None,
            reserved_by: None,
            attachment: None,
            transform,
            prefab: None,
            despawned: false,
        }
    }

    fn from_record(record: &PossessionRecord) -> Self {
        let (owner, reserved_by, attachment) = match &record.state {
            PossessionState::Free => (None, None, None),
            PossessionState::Requested { actor } => (None, Some(*actor), None),
            PossessionState::Owned { actor } => (Some(*actor), None, None),
            PossessionState::Attached {
                actor,
                anchor,
                params,
            } => (Some(*actor), None, Some((anchor.clone(), *params))),
        };
        Self {
            generation: record.generation,
            owner,
            reserved_by,
            attachment,
            transform: record.original.unwrap_or(record.transform),
            prefab: Some(record.prefab.clone()),
            despawned: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Attached to us, ownership not yet confirmed
    PendingVerification,
    /// Confirmed, waiting for the first tick with a known anchor
    Verified,
    Following,
    /// Frozen under inspection; ownership kept
    Paused,
    /// Verification window elapsed under the strict policy
    Denied,
}

/// Local, advisory attachment of a possessable to one of our anchors
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentBinding {
    pub id: PossessableId,
    pub anchor: AnchorId,
    pub params: AttachParams,
    pub generation: Generation,
    pub owned_since: Generation,
    pub base_scale: Vec3,
    pub state: BindingState,
    pub deadline: Instant,
    /// Following without confirmed ownership
    pub degraded: bool,
}

impl AttachmentBinding {
    pub fn is_following(&self) -> bool {
        matches!(self.state, BindingState::Verified | BindingState::Following)
    }

    /// World transform for the current anchor pose
    pub fn project(&self, anchor: &Pose) -> Transform {
        let pose = anchor.compose(&self.params.offset_pose());
        Transform::new(
            pose.position,
            pose.rotation,
            self.base_scale * self.params.scale,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FollowerEvent {
    Verified(PossessableId),
    VerificationTimeout(PossessableId),
    DegradedFollow(PossessableId),
    Released {
        id: PossessableId,
        consumed: bool,
    },
    /// A newer broadcast replaced our binding
    Superseded(PossessableId),
}

pub struct AttachmentFollower {
    local: Option<ActorId>,
    policy: TimeoutPolicy,
    verify_timeout: Duration,
    projections: HashMap<PossessableId, Observation>,
    bindings: HashMap<PossessableId, AttachmentBinding>,
    /// Highest grant seen per possessable, stale or not
    grants: HashMap<PossessableId, (ActorId, Generation)>,
    presented: HashMap<PossessableId, Transform>,
    events: Vec<FollowerEvent>,
}

impl AttachmentFollower {
    pub fn new(policy: TimeoutPolicy, verify_timeout: Duration) -> Self {
        Self {
            local: None,
            policy,
            verify_timeout,
            projections: HashMap::new(),
            bindings: HashMap::new(),
            grants: HashMap::new(),
            presented: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.timeout_policy, config.verify_timeout)
    }

    pub fn set_local_actor(&mut self, actor: ActorId) {
        self.local = Some(actor);
    }

    pub fn local_actor(&self) -> Option<ActorId> {
        self.local
    }

    /// Clears everything learned during a session
    pub fn reset(&mut self) {
        self.local = None;
        self.projections.clear();
        self.bindings.clear();
        self.grants.clear();
        self.presented.clear();
        self.events.clear();
    }

    /// Feeds one server packet; returns false if it was stale or irrelevant
    pub fn apply(&mut self, packet: &Packet, now: Instant) -> bool {
        match packet {
            Packet::RecordSync { record } => self.on_record(record, now),
            Packet::Grant {
                id,
                actor,
                generation,
                ..
            } => self.on_grant(*id, *actor, *generation),
            Packet::Reserved {
                id,
                actor,
                generation,
            } => self.on_reserved(*id, *actor, *generation),
            Packet::AttachBroadcast(update) => self.on_attach(update, now),
            Packet::ReleaseBroadcast {
                id,
                generation,
                transform,
                consumed,
            } => self.on_release(*id, *generation, *transform, *consumed),
            Packet::RelocateBroadcast {
                id,
                pose,
                generation,
            } => self.on_relocate(*id, *pose, *generation),
            Packet::DuplicateBroadcast {
                new_id,
                source_prefab,
                position,
                rotation,
                scale,
                generation,
                ..
            } => self.on_duplicate(
                *new_id,
                source_prefab.clone(),
                Transform::new(*position, *rotation, *scale),
                *generation,
            ),
            _ => false,
        }
    }

    /// True if `generation` is newer than what we hold for `id`
    fn is_newer(&self, id: PossessableId, generation: Generation) -> bool {
        match self.projections.get(&id) {
            Some(seen) => generation > seen.generation,
            None => true,
        }
    }

    fn discard(&self, id: PossessableId, generation: Generation) -> bool {
        debug!("Discarding stale update for {} (generation {})", id, generation);
        false
    }

    fn drop_binding(&mut self, id: PossessableId) {
        if self.bindings.remove(&id).is_some() {
            info!("Binding for {} superseded", id);
            self.events.push(FollowerEvent::Superseded(id));
        }
    }

    pub fn on_record(&mut self, record: &PossessionRecord, now: Instant) -> bool {
        if !self.is_newer(record.id, record.generation) {
            return self.discard(record.id, record.generation);
        }

        let observation = Observation::from_record(record);
        self.presented.insert(record.id, observation.transform);
        self.projections.insert(record.id, observation);

        match (&record.state, self.local) {
            (
                PossessionState::Attached {
                    actor,
                    anchor,
                    params,
                },
                Some(local),
            ) if *actor == local => {
                // The record itself is authoritative proof of ownership
                let owned_since = record.owned_since.unwrap_or(record.generation);
                self.note_grant(record.id, local, owned_since);
                self.bind(
                    AttachUpdate {
                        id: record.id,
                        actor: local,
                        anchor: anchor.clone(),
                        params: *params,
                        base_scale: record.base_scale(),
                        owned_since,
                        generation: record.generation,
                    },
                    now,
                );
            }
            _ => self.drop_binding(record.id),
        }
        true
    }

    fn note_grant(&mut self, id: PossessableId, actor: ActorId, generation: Generation) {
        let entry = self.grants.entry(id).or_insert((actor, generation));
        if generation >= entry.1 {
            *entry = (actor, generation);
        }
    }

    /// Records a grant and completes any binding waiting for it.
    ///
    /// The grant counts for verification even if the projection has already
    /// moved past it.
    pub fn on_grant(&mut self, id: PossessableId, actor: ActorId, generation: Generation) -> bool {
        self.note_grant(id, actor, generation);

        if Some(actor) == self.local {
            if let Some(binding) = self.bindings.get_mut(&id) {
                if binding.state == BindingState::PendingVerification
                    && binding.owned_since == generation
                {
                    binding.state = BindingState::Verified;
                    info!("Ownership of {} verified", id);
                    self.events.push(FollowerEvent::Verified(id));
                }
            }
        }

        if !self.is_newer(id, generation) {
            return self.discard(id, generation);
        }

        let transform = self
            .projections
            .get(&id)
            .map_or_else(Transform::identity, |seen| seen.transform);
        let mut observation = Observation::free(generation, transform);
        observation.owner = Some(actor);
        observation.prefab = self.projections.get(&id).and_then(|seen| seen.prefab.clone());
        self.projections.insert(id, observation);
        self.presented.entry(id).or_insert(transform);

        if Some(actor) != self.local {
            self.drop_binding(id);
        }
        true
    }

    pub fn on_reserved(&mut self, id: PossessableId, actor: ActorId, generation: Generation) -> bool {
        if !self.is_newer(id, generation) {
            return self.discard(id, generation);
        }
        let seen = self
            .projections
            .entry(id)
            .or_insert_with(|| Observation::free(generation, Transform::identity()));
        seen.generation = generation;
        seen.owner = None;
        seen.attachment = None;
        seen.reserved_by = Some(actor);
        self.drop_binding(id);
        true
    }

    /// Handles an attach broadcast; binds only if it names the local actor
    pub fn on_attach(&mut self, update: &AttachUpdate, now: Instant) -> bool {
        if !self.is_newer(update.id, update.generation) {
            return self.discard(update.id, update.generation);
        }

        let seen = self
            .projections
            .entry(update.id)
            .or_insert_with(|| Observation::free(update.generation, Transform::identity()));
        seen.generation = update.generation;
        seen.owner = Some(update.actor);
        seen.reserved_by = None;
        seen.attachment = Some((update.anchor.clone(), update.params));
        let resting = seen.transform;
        self.presented.entry(update.id).or_insert(resting);

        if Some(update.actor) == self.local {
            self.bind(update.clone(), now);
        } else {
            debug!(
                "{} attached to remote actor {}, projection only",
                update.id, update.actor
            );
            self.drop_binding(update.id);
        }
        true
    }

    fn bind(&mut self, update: AttachUpdate, now: Instant) {
        let confirmed = self.grants.get(&update.id) == Some(&(update.actor, update.owned_since));
        // A re-attach within the same ownership keeps the pause flag
        let paused = self
            .bindings
            .get(&update.id)
            .map_or(false, |b| b.owned_since == update.owned_since && b.state == BindingState::Paused);

        let state = if paused {
            BindingState::Paused
        } else if confirmed {
            BindingState::Verified
        } else {
            BindingState::PendingVerification
        };

        let binding = AttachmentBinding {
            id: update.id,
            anchor: update.anchor,
            params: update.params,
            generation: update.generation,
            owned_since: update.owned_since,
            base_scale: update.base_scale,
            state,
            deadline: now + self.verify_timeout,
            degraded: false,
        };

        if state == BindingState::Verified {
            info!("Ownership of {} verified on attach", update.id);
            self.events.push(FollowerEvent::Verified(update.id));
        } else if state == BindingState::PendingVerification {
            debug!("Waiting to verify ownership of {}", update.id);
        }
        self.bindings.insert(update.id, binding);
    }

    /// Explicit confirmation that the local actor owns `id`
    pub fn confirm_ownership(&mut self, id: PossessableId) -> bool {
        match self.bindings.get_mut(&id) {
            Some(binding) if binding.state == BindingState::PendingVerification => {
                binding.state = BindingState::Verified;
                self.events.push(FollowerEvent::Verified(id));
                true
            }
            _ => false,
        }
    }

    /// Restores the resting presentation and drops any binding
    pub fn on_release(
        &mut self,
        id: PossessableId,
        generation: Generation,
        transform: Transform,
        consumed: bool,
    ) -> bool {
        if !self.is_newer(id, generation) {
            return self.discard(id, generation);
        }

        let prefab = self.projections.get(&id).and_then(|seen| seen.prefab.clone());
        let mut observation = Observation::free(generation, transform);
        observation.prefab = prefab;
        observation.despawned = consumed;
        self.projections.insert(id, observation);

        if consumed {
            self.presented.remove(&id);
        } else {
            self.presented.insert(id, transform);
        }

        if self.bindings.remove(&id).is_some() {
            info!("Released {}", id);
            self.events.push(FollowerEvent::Released { id, consumed });
        }
        true
    }

    pub fn on_relocate(&mut self, id: PossessableId, pose: Pose, generation: Generation) -> bool {
        if !self.is_newer(id, generation) {
            return self.discard(id, generation);
        }

        let previous = self.projections.get(&id);
        let scale = previous.map_or(Vec3::one(), |seen| seen.transform.scale);
        let prefab = previous.and_then(|seen| seen.prefab.clone());
        let transform = Transform::new(pose.position, pose.rotation, scale);

        let mut observation = Observation::free(generation, transform);
        observation.prefab = prefab;
        self.projections.insert(id, observation);
        self.presented.insert(id, transform);
        self.drop_binding(id);
        true
    }

    pub fn on_duplicate(
        &mut self,
        id: PossessableId,
        prefab: PrefabRef,
        transform: Transform,
        generation: Generation,
    ) -> bool {
        if !self.is_newer(id, generation) {
            return self.discard(id, generation);
        }
        let mut observation = Observation::free(generation, transform);
        observation.prefab = Some(prefab);
        self.projections.insert(id, observation);
        self.presented.insert(id, transform);
        true
    }

    /// Freezes a followed object in place without giving up ownership
    pub fn pause(&mut self, id: PossessableId) -> bool {
        match self.bindings.get_mut(&id) {
            Some(binding) if binding.is_following() => {
                binding.state = BindingState::Paused;
                true
            }
            _ => false,
        }
    }

    pub fn resume(&mut self, id: PossessableId) -> bool {
        match self.bindings.get_mut(&id) {
            Some(binding) if binding.state == BindingState::Paused => {
                binding.state = BindingState::Verified;
                true
            }
            _ => false,
        }
    }

    /// Applies verification deadlines and moves every followed object
    pub fn tick(&mut self, anchors: &dyn AnchorSource, now: Instant) {
        let Some(local) = self.local else {
            return;
        };

        for binding in self.bindings.values_mut() {
            if binding.state == BindingState::PendingVerification && now >= binding.deadline {
                match self.policy {
                    TimeoutPolicy::Strict => {
                        warn!(
                            "Could not verify ownership of {} in time, refusing to move it",
                            binding.id
                        );
                        binding.state = BindingState::Denied;
                        self.events
                            .push(FollowerEvent::VerificationTimeout(binding.id));
                    }
                    TimeoutPolicy::DegradedAllow => {
                        warn!(
                            "Could not verify ownership of {} in time, following anyway",
                            binding.id
                        );
                        binding.state = BindingState::Verified;
                        binding.degraded = true;
                        self.events.push(FollowerEvent::DegradedFollow(binding.id));
                    }
                }
            }

            if !binding.is_following() {
                continue;
            }
            let Some(anchor) = anchors.anchor_pose(local, &binding.anchor) else {
                continue;
            };
            self.presented.insert(binding.id, binding.project(&anchor));
            binding.state = BindingState::Following;
        }
    }

    /// Current presentation transform for rendering
    pub fn pose(&self, id: PossessableId) -> Option<Transform> {
        self.presented.get(&id).copied()
    }

    pub fn binding(&self, id: PossessableId) -> Option<&AttachmentBinding> {
        self.bindings.get(&id)
    }

    pub fn observation(&self, id: PossessableId) -> Option<&Observation> {
        self.projections.get(&id)
    }

    pub fn observations(&self) -> impl Iterator<Item = (&PossessableId, &Observation)> {
        self.projections.iter()
    }

    pub fn drain_events(&mut self) -> Vec<FollowerEvent> {
        std::mem::take(&mut self.events)
    }
}
