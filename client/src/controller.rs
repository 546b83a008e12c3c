//! Actor-facing possession API.
//!
//! The [`PossessionController`] turns player intent (take from a slot, put
//! back, use, inspect, select, auto-move, mirror) into requests for the
//! server and routes the answers back to the inventory. Nothing here blocks:
//! every request resolves when a matching packet arrives or its deadline
//! passes during [`PossessionController::tick`].
//!
//! Only one request is outstanding at a time. Issuing a new take abandons the
//! previous one locally. If the server grants an abandoned request anyway,
//! the unwanted ownership is handed straight back, and the new take is held
//! back until that exchange settles so it never counts against the actor's
//! holding limit.

use crate::anchors::AnchorSource;
use crate::follower::{AttachmentFollower, FollowerEvent};
use crate::inventory::InventoryBridge;
use crate::relay::{RelayEvent, RelayTracker};
use log::{debug, info, warn};
use shared::{
    ActorId, ClientConfig, DenyReason, Generation, Packet, Pose, PossessableId, RequestId,
};
use std::collections::VecDeque;
use std::time::Instant;

/// Requests remembered after they stop mattering to the UI
const REMEMBERED_REQUESTS: usize = 64;

/// Outbound half of the connection to the arbiter
pub trait ArbiterLink {
    fn send(&mut self, packet: Packet);
}

/// Outbox flushed by the network loop after each step
impl ArbiterLink for Vec<Packet> {
    fn send(&mut self, packet: Packet) {
        self.push(packet);
    }
}

/// The possessable currently in hand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Held {
    pub id: PossessableId,
    pub slot: usize,
    pub generation: Generation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Take { slot: usize },
    PutBack { slot: usize },
    Use { slot: usize },
}

impl PendingKind {
    fn slot(self) -> usize {
        match self {
            PendingKind::Take { slot } | PendingKind::PutBack { slot } | PendingKind::Use { slot } => {
                slot
            }
        }
    }

    fn is_release(self) -> bool {
        !matches!(self, PendingKind::Take { .. })
    }
}

/// A take waiting for an abandoned request to settle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedTake {
    pub slot: usize,
    pub id: PossessableId,
    pub deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub request_id: RequestId,
    pub id: PossessableId,
    pub kind: PendingKind,
    pub deadline: Instant,
}

/// Bounded set of request ids, oldest forgotten first
#[derive(Debug, Default)]
struct RequestLog(VecDeque<RequestId>);

impl RequestLog {
    fn remember(&mut self, request_id: RequestId) {
        if self.0.len() == REMEMBERED_REQUESTS {
            self.0.pop_front();
        }
        self.0.push_back(request_id);
    }

    fn forget(&mut self, request_id: RequestId) -> bool {
        match self.0.iter().position(|r| *r == request_id) {
            Some(index) => {
                self.0.remove(index);
                true
            }
            None => false,
        }
    }
}

pub struct PossessionController<B: InventoryBridge, L: ArbiterLink> {
    actor: Option<ActorId>,
    config: ClientConfig,
    inventory: B,
    link: L,
    follower: AttachmentFollower,
    relay: RelayTracker,
    held: Option<Held>,
    pending: Option<Pending>,
    /// Requests given up locally; a late grant is handed back
    abandoned: RequestLog,
    /// Releases sent only to return unwanted ownership
    handbacks: RequestLog,
    /// Abandoned take, or the hand back of its grant, still unanswered
    settling: Option<RequestId>,
    queued: Option<QueuedTake>,
    selected: Option<PossessableId>,
    next_request_id: RequestId,
}

impl<B: InventoryBridge, L: ArbiterLink> PossessionController<B, L> {
    pub fn new(config: ClientConfig, inventory: B, link: L) -> Self {
        Self {
            actor: None,
            follower: AttachmentFollower::from_config(&config),
            relay: RelayTracker::new(config.request_timeout),
            config,
            inventory,
            link,
            held: None,
            pending: None,
            abandoned: RequestLog::default(),
            handbacks: RequestLog::default(),
            settling: None,
            queued: None,
            selected: None,
            next_request_id: 1,
        }
    }

    pub fn actor(&self) -> Option<ActorId> {
        self.actor
    }

    pub fn set_actor(&mut self, actor: ActorId) {
        self.actor = Some(actor);
        self.follower.set_local_actor(actor);
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn held(&self) -> Option<Held> {
        self.held
    }

    pub fn pending(&self) -> Option<Pending> {
        self.pending
    }

    pub fn queued_take(&self) -> Option<QueuedTake> {
        self.queued
    }

    pub fn selected(&self) -> Option<PossessableId> {
        self.selected
    }

    pub fn follower(&self) -> &AttachmentFollower {
        &self.follower
    }

    pub fn relay(&self) -> &RelayTracker {
        &self.relay
    }

    pub fn inventory(&self) -> &B {
        &self.inventory
    }

    pub fn inventory_mut(&mut self) -> &mut B {
        &mut self.inventory
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn allocate_request_id(&mut self) -> RequestId {
        let request_id = self.next_request_id;
        // Zero is reserved for refusals that answer no particular request
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        request_id
    }

    fn connected_actor(&self, operation: &str) -> Option<ActorId> {
        if self.actor.is_none() {
            warn!("Cannot {} before the server assigned an actor", operation);
        }
        self.actor
    }

    fn abandon_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(
                "Abandoning request {} for {}",
                pending.request_id, pending.id
            );
            self.abandoned.remember(pending.request_id);
            if !pending.kind.is_release() {
                self.settling = Some(pending.request_id);
            }
        }
    }

    /// Clears `request_id` from settling and sends any take held back on it
    fn settle(&mut self, request_id: RequestId, now: Instant) {
        if self.settling != Some(request_id) {
            return;
        }
        self.settling = None;
        let Some(queued) = self.queued.take() else {
            return;
        };
        match (self.actor, self.inventory.object_in_slot(queued.slot)) {
            (Some(actor), Some(id)) if id == queued.id && self.held.is_none() => {
                self.send_take(actor, queued.slot, id, now)
            }
            _ => self
                .inventory
                .on_possession_denied(queued.slot, DenyReason::Unknown),
        }
    }

    fn send_release(&mut self, actor: ActorId, id: PossessableId, consume: bool) -> RequestId {
        let request_id = self.allocate_request_id();
        self.link.send(Packet::ReleasePossession {
            request_id,
            id,
            actor,
            consume,
        });
        request_id
    }

    /// Gives ownership we no longer want back to the arbiter
    fn hand_back(&mut self, actor: ActorId, id: PossessableId) -> RequestId {
        info!("Handing {} back to the server", id);
        let request_id = self.send_release(actor, id, false);
        self.handbacks.remember(request_id);
        request_id
    }

    fn send_take(&mut self, actor: ActorId, slot: usize, id: PossessableId, now: Instant) {
        let request_id = self.allocate_request_id();
        self.link.send(Packet::RequestPossession {
            request_id,
            id,
            actor,
        });
        self.pending = Some(Pending {
            request_id,
            id,
            kind: PendingKind::Take { slot },
            deadline: now + self.config.request_timeout,
        });
    }

    /// Asks for the object stored in `slot`; returns true if a request went
    /// out or was queued behind an abandoned one
    pub fn take_from_slot(&mut self, slot: usize, now: Instant) -> bool {
        if self.held.is_some() {
            debug!("Already holding something, ignoring take from slot {}", slot);
            return false;
        }
        let pending_slot = match self.pending {
            Some(Pending {
                kind: PendingKind::Take { slot },
                ..
            }) => Some(slot),
            _ => None,
        };
        if pending_slot == Some(slot) || self.queued.map(|q| q.slot) == Some(slot) {
            return false;
        }

        let Some(id) = self.inventory.object_in_slot(slot) else {
            self.inventory.on_possession_denied(slot, DenyReason::Unknown);
            return false;
        };
        let Some(actor) = self.connected_actor("take an item") else {
            return false;
        };

        self.abandon_pending();
        if let Some(settling) = self.settling {
            debug!(
                "Holding back take from slot {} until request {} settles",
                slot, settling
            );
            self.queued = Some(QueuedTake {
                slot,
                id,
                deadline: now + self.config.request_timeout,
            });
            return true;
        }
        self.send_take(actor, slot, id, now);
        true
    }

    fn release_held(&mut self, consume: bool, now: Instant) -> bool {
        let Some(held) = self.held else {
            // Putting back while a take is in flight cancels the take
            self.queued = None;
            if matches!(self.pending, Some(p) if !p.kind.is_release()) {
                self.abandon_pending();
            }
            return false;
        };
        if matches!(self.pending, Some(p) if p.kind.is_release()) {
            return false;
        }
        let Some(actor) = self.connected_actor("release an item") else {
            return false;
        };

        let request_id = self.send_release(actor, held.id, consume);
        let kind = if consume {
            PendingKind::Use { slot: held.slot }
        } else {
            PendingKind::PutBack { slot: held.slot }
        };
        self.pending = Some(Pending {
            request_id,
            id: held.id,
            kind,
            deadline: now + self.config.request_timeout,
        });
        true
    }

    /// Returns the held object to its slot; does nothing when empty-handed
    pub fn put_back(&mut self, now: Instant) -> bool {
        self.release_held(false, now)
    }

    /// Uses up the held object
    pub fn use_held_item(&mut self, now: Instant) -> bool {
        self.release_held(true, now)
    }

    /// Freezes the held object in place for inspection, keeping ownership
    pub fn release_for_inspect(&mut self) -> bool {
        match self.held {
            Some(held) => self.follower.pause(held.id),
            None => false,
        }
    }

    pub fn recover_from_inspect(&mut self) -> bool {
        match self.held {
            Some(held) => self.follower.resume(held.id),
            None => false,
        }
    }

    /// Places a short-lived reservation on `id`
    pub fn select(&mut self, id: PossessableId) -> bool {
        let Some(actor) = self.connected_actor("select an item") else {
            return false;
        };
        self.selected = Some(id);
        self.link.send(Packet::ReservePossession { id, actor });
        true
    }

    /// Asks the server to move a free possessable to `pose`
    pub fn auto_move(&mut self, id: PossessableId, pose: Pose) -> bool {
        let Some(actor) = self.connected_actor("move an item") else {
            return false;
        };
        self.link.send(Packet::Relocate { id, actor, pose });
        true
    }

    /// Sends a copy of the held object through the named mirror group
    pub fn send_to_mirror(&mut self, group: &str, now: Instant) -> bool {
        let Some(held) = self.held else {
            debug!("Nothing in hand to send through mirror {}", group);
            return false;
        };
        if !self.relay.is_idle() {
            return false;
        }
        let request_id = self.allocate_request_id();
        if !self.relay.begin(request_id, held.id, now) {
            return false;
        }
        self.link.send(Packet::SendToMirror {
            request_id,
            source: held.id,
            group: group.to_string(),
        });
        true
    }

    /// Routes one server packet through the follower, relay and inventory
    pub fn handle_packet(&mut self, packet: &Packet, now: Instant) {
        let fresh = self.follower.apply(packet, now);

        match packet {
            Packet::Connected { actor } => {
                info!("Connected as actor {}", actor);
                self.set_actor(*actor);
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected by server: {}", reason);
                self.reset();
            }

            Packet::Grant {
                request_id,
                id,
                actor,
                generation,
            } if Some(*actor) == self.actor => {
                self.on_grant(*request_id, *id, *actor, *generation, now)
            }

            Packet::Denied {
                request_id,
                id,
                reason,
            } => self.on_denied(*request_id, *id, *reason, now),

            Packet::Ack { request_id, id, .. } => self.on_ack(*request_id, *id, now),

            Packet::DuplicateBroadcast { new_id, .. } => self.relay.on_duplicate(*new_id),

            Packet::Reserved { id, actor, .. } => {
                if self.selected == Some(*id) && Some(*actor) != self.actor {
                    self.selected = None;
                }
            }

            Packet::ReleaseBroadcast { id, consumed, .. } if fresh => {
                // Our own put back resolves through the ack instead
                let releasing = matches!(self.pending, Some(p) if p.id == *id && p.kind.is_release());
                if !releasing {
                    self.lose_hold(*id, *consumed);
                }
            }

            _ => {}
        }
    }

    fn on_grant(
        &mut self,
        request_id: RequestId,
        id: PossessableId,
        actor: ActorId,
        generation: Generation,
        now: Instant,
    ) {
        match self.pending {
            Some(Pending {
                request_id: expected,
                id: pending_id,
                kind: PendingKind::Take { slot },
                ..
            }) if expected == request_id && pending_id == id => {
                self.pending = None;
                self.held = Some(Held {
                    id,
                    slot,
                    generation,
                });
                self.link.send(Packet::AttachToAnchor {
                    id,
                    actor,
                    anchor: self.config.hand_anchor.clone(),
                    params: self.config.hand_params,
                });
                self.inventory.on_possession_granted(slot, id);
            }
            _ if self.abandoned.forget(request_id) => {
                debug!("Late grant for abandoned request {}", request_id);
                let handback = self.hand_back(actor, id);
                if self.settling == Some(request_id) {
                    self.settling = Some(handback);
                }
            }
            _ => {}
        }
    }

    fn on_denied(
        &mut self,
        request_id: RequestId,
        id: PossessableId,
        reason: DenyReason,
        now: Instant,
    ) {
        if self.relay.on_denied(request_id, reason) {
            return;
        }
        if self.handbacks.forget(request_id) {
            debug!("Hand back of {} refused: {:?}", id, reason);
            self.settle(request_id, now);
            return;
        }

        match self.pending {
            Some(pending) if pending.request_id == request_id => {
                self.pending = None;
                match pending.kind {
                    PendingKind::Take { slot } => self.inventory.on_possession_denied(slot, reason),
                    PendingKind::PutBack { slot } | PendingKind::Use { slot }
                        if reason == DenyReason::NotOwner =>
                    {
                        // The server already considers it released
                        self.held = None;
                        self.inventory.on_released(slot);
                    }
                    kind => self.inventory.on_possession_denied(kind.slot(), reason),
                }
            }
            _ if self.abandoned.forget(request_id) => {
                debug!("Abandoned request {} was denied: {:?}", request_id, reason);
                self.settle(request_id, now);
            }
            _ => {
                warn!("Server refused request on {}: {:?}", id, reason);
                if self.selected == Some(id) {
                    self.selected = None;
                }
                if reason == DenyReason::NotOwner {
                    if let Some(held) = self.held.filter(|held| held.id == id) {
                        self.held = None;
                        self.inventory.on_released(held.slot);
                    }
                }
            }
        }
    }

    fn on_ack(&mut self, request_id: RequestId, id: PossessableId, now: Instant) {
        if self.relay.on_ack(request_id, id) {
            return;
        }
        if self.handbacks.forget(request_id) {
            self.settle(request_id, now);
            return;
        }

        match self.pending {
            Some(pending) if pending.request_id == request_id => {
                self.pending = None;
                self.held = None;
                match pending.kind {
                    PendingKind::PutBack { slot } => self.inventory.on_released(slot),
                    PendingKind::Use { slot } => self.inventory.on_consumed(slot, pending.id),
                    PendingKind::Take { slot } => {
                        warn!("Unexpected ack for take from slot {}", slot);
                    }
                }
            }
            _ => {
                if self.abandoned.forget(request_id) {
                    self.settle(request_id, now);
                }
            }
        }
    }

    /// The server freed our object without us asking
    fn lose_hold(&mut self, id: PossessableId, consumed: bool) {
        let Some(held) = self.held.filter(|held| held.id == id) else {
            return;
        };
        info!("Lost hold of {}", id);
        self.held = None;
        if consumed {
            self.inventory.on_consumed(held.slot, id);
        } else {
            self.inventory.on_released(held.slot);
        }
    }

    /// Advances the follower and expires overdue requests
    pub fn tick(&mut self, anchors: &dyn AnchorSource, now: Instant) {
        self.follower.tick(anchors, now);

        for event in self.follower.drain_events() {
            match event {
                FollowerEvent::VerificationTimeout(id) => {
                    if let (Some(held), Some(actor)) = (self.held, self.actor) {
                        if held.id == id {
                            self.held = None;
                            self.hand_back(actor, id);
                            self.inventory
                                .on_possession_denied(held.slot, DenyReason::VerificationTimeout);
                        }
                    }
                }
                FollowerEvent::Superseded(id) => {
                    let releasing = matches!(self.pending, Some(p) if p.id == id && p.kind.is_release());
                    if !releasing {
                        self.lose_hold(id, false);
                    }
                }
                FollowerEvent::Verified(id) => debug!("Following {}", id),
                FollowerEvent::DegradedFollow(id) => debug!("Following {} unverified", id),
                FollowerEvent::Released { .. } => {}
            }
        }

        if let Some(pending) = self.pending {
            if now >= pending.deadline {
                warn!(
                    "Request {} for {} timed out",
                    pending.request_id, pending.id
                );
                self.pending = None;
                self.abandoned.remember(pending.request_id);
                self.inventory
                    .on_possession_denied(pending.kind.slot(), DenyReason::TimedOut);
            }
        }

        if let Some(queued) = self.queued {
            if now >= queued.deadline {
                warn!(
                    "Gave up waiting for request {:?} before taking from slot {}",
                    self.settling, queued.slot
                );
                self.queued = None;
                self.settling = None;
                self.inventory
                    .on_possession_denied(queued.slot, DenyReason::TimedOut);
            }
        }

        self.relay.tick(now);
    }

    pub fn drain_relay_events(&mut self) -> Vec<RelayEvent> {
        self.relay.drain_events()
    }

    /// Forgets the session after a disconnect
    pub fn reset(&mut self) {
        if let Some(held) = self.held.take() {
            self.inventory.on_released(held.slot);
        }
        self.pending = None;
        self.settling = None;
        self.queued = None;
        self.selected = None;
        self.actor = None;
        self.follower.reset();
        self.relay = RelayTracker::new(self.config.request_timeout);
    }
}
