//! Server-side arbitration of possession requests
//!
//! The arbiter is the only writer of possession records. Each operation
//! validates the current record under its lock, applies one transition and
//! broadcasts the outcome to every participant. Refusals are returned to the
//! caller, which answers only the requester.
//!
//! Each actor's holdings sit behind their own lock, so requests from
//! different actors for different ids never queue behind each other. Lock
//! order is the actor's holdings, then reservations, then the record lock
//! taken by the registry. Broadcasts are emitted while the record lock is held so the
//! per-possessable broadcast order always matches generation order.

use crate::registry::ObjectRegistry;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use shared::{
    ActorId, AnchorId, AttachParams, AttachUpdate, Destination, Generation, Packet, Pose,
    PossessableId, PossessionError, PossessionRecord, PossessionState, RequestId, ServerConfig,
    Transform,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sink for packets every participant must see
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, packet: Packet);
}

impl<B: Broadcaster + ?Sized> Broadcaster for Arc<B> {
    fn broadcast(&self, packet: Packet) {
        (**self).broadcast(packet)
    }
}

/// Keeps every broadcast in memory, for tests and tools
#[derive(Debug, Default)]
pub struct RecordingBroadcaster {
    packets: Mutex<Vec<Packet>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything broadcast so far
    pub fn drain(&self) -> Vec<Packet> {
        std::mem::take(&mut *self.packets.lock())
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, packet: Packet) {
        self.packets.lock().push(packet);
    }
}

/// Ownership granted to an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub id: PossessableId,
    pub actor: ActorId,
    pub generation: Generation,
}

/// Successful release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub request_id: RequestId,
    pub id: PossessableId,
    pub generation: Generation,
    pub consumed: bool,
}

#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub max_held_per_actor: usize,
    pub reservation_timeout: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for ArbiterConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_held_per_actor: config.max_held_per_actor,
            reservation_timeout: config.reservation_timeout,
        }
    }
}

/// Possessables owned by one actor
type Holdings = Arc<Mutex<BTreeSet<PossessableId>>>;

#[derive(Debug, Clone, Copy)]
struct Reservation {
    actor: ActorId,
    deadline: Instant,
}

pub struct OwnershipArbiter<B: Broadcaster> {
    registry: Arc<ObjectRegistry>,
    broadcaster: B,
    config: ArbiterConfig,
    holdings: RwLock<HashMap<ActorId, Holdings>>,
    reservations: Mutex<HashMap<PossessableId, Reservation>>,
}

fn already_held(record: &PossessionRecord, requester: ActorId) -> PossessionError {
    PossessionError::AlreadyHeld {
        id: record.id,
        holder: record.holder().unwrap_or(requester),
    }
}

impl<B: Broadcaster> OwnershipArbiter<B> {
    pub fn new(registry: Arc<ObjectRegistry>, broadcaster: B, config: ArbiterConfig) -> Self {
        Self {
            registry,
            broadcaster,
            config,
            holdings: RwLock::new(HashMap::new()),
            reservations: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &B {
        &self.broadcaster
    }

    fn holdings_of(&self, actor: ActorId) -> Holdings {
        if let Some(holdings) = self.holdings.read().get(&actor) {
            return Arc::clone(holdings);
        }
        Arc::clone(self.holdings.write().entry(actor).or_default())
    }

    /// Grants `actor` exclusive ownership of a free possessable.
    ///
    /// The actor's own reservation counts as free. The first request the
    /// server processes wins; every later one is refused with `AlreadyHeld`
    /// until the owner releases.
    pub fn request_possession(
        &self,
        request_id: RequestId,
        id: PossessableId,
        actor: ActorId,
    ) -> Result<Grant, PossessionError> {
        let holdings = self.holdings_of(actor);
        let mut owned = holdings.lock();
        let held = owned.len();

        let result = self.registry.mutate(id, |record| {
            match record.state {
                PossessionState::Free => {}
                PossessionState::Requested { actor: reserver } if reserver == actor => {}
                _ => return Err(already_held(record, actor)),
            }
            if held >= self.config.max_held_per_actor {
                return Err(PossessionError::Full { actor });
            }

            let generation = record.transition(PossessionState::Owned { actor });
            self.broadcaster.broadcast(Packet::Grant {
                request_id,
                id,
                actor,
                generation,
            });
            Ok(generation)
        });

        let generation = match result {
            Ok(generation) => generation,
            Err(e) => {
                warn!("Denied possession of {} to actor {}: {}", id, actor, e);
                return Err(e);
            }
        };

        owned.insert(id);
        self.reservations.lock().remove(&id);
        info!(
            "Granted {} to actor {} (generation {})",
            id, actor, generation
        );

        Ok(Grant {
            id,
            actor,
            generation,
        })
    }

    /// Hands a possessable back, restoring its pre-pickup presentation.
    ///
    /// Releasing something the actor does not own is refused with `NotOwner`
    /// and never changes state, which makes repeated releases harmless. With
    /// `consume` the record is despawned in the same step.
    pub fn release_possession(
        &self,
        request_id: RequestId,
        id: PossessableId,
        actor: ActorId,
        consume: bool,
    ) -> Result<Ack, PossessionError> {
        let holdings = self.holdings_of(actor);
        let mut owned = holdings.lock();

        let release = |record: &mut PossessionRecord| {
            if record.owner() != Some(actor) {
                return Err(PossessionError::NotOwner { id, actor });
            }
            let generation = record.reset_to_free();
            self.broadcaster.broadcast(Packet::ReleaseBroadcast {
                id,
                generation,
                transform: record.transform,
                consumed: consume,
            });
            Ok(generation)
        };

        let result = if consume {
            self.registry.remove_with(id, release)
        } else {
            self.registry.mutate(id, release)
        };

        let generation = match result {
            Ok(generation) => generation,
            Err(e) => {
                warn!("Refused release of {} by actor {}: {}", id, actor, e);
                return Err(e);
            }
        };

        owned.remove(&id);
        info!(
            "Actor {} {} {} (generation {})",
            actor,
            if consume { "consumed" } else { "released" },
            id,
            generation
        );

        Ok(Ack {
            request_id,
            id,
            generation,
            consumed: consume,
        })
    }

    /// Binds an owned possessable to one of the owner's anchors.
    ///
    /// The broadcast carries the full attachment parameters, the original
    /// scale and the generation of the grant so every follower configures
    /// itself identically.
    pub fn attach_to_anchor(
        &self,
        id: PossessableId,
        actor: ActorId,
        anchor: AnchorId,
        params: AttachParams,
    ) -> Result<Grant, PossessionError> {
        let result = self.registry.mutate(id, |record| {
            if record.owner() != Some(actor) {
                return Err(PossessionError::NotOwner { id, actor });
            }

            let generation = record.transition(PossessionState::Attached {
                actor,
                anchor: anchor.clone(),
                params,
            });
            self.broadcaster
                .broadcast(Packet::AttachBroadcast(AttachUpdate {
                    id,
                    actor,
                    anchor: anchor.clone(),
                    params,
                    base_scale: record.base_scale(),
                    owned_since: record.owned_since.unwrap_or(generation),
                    generation,
                }));
            Ok(generation)
        });

        match result {
            Ok(generation) => {
                debug!("Attached {} to {}/{}", id, actor, anchor);
                Ok(Grant {
                    id,
                    actor,
                    generation,
                })
            }
            Err(e) => {
                warn!("Refused attach of {} by actor {}: {}", id, actor, e);
                Err(e)
            }
        }
    }

    /// Spawns a copy of `source` at `destination`, leaving the source alone.
    ///
    /// The copy is registered free, placed, and, for an anchor destination,
    /// granted to and attached on the named actor through the same
    /// transitions a regular pickup uses.
    pub fn duplicate_and_relocate(
        &self,
        request_id: RequestId,
        source: PossessableId,
        destination: Destination,
    ) -> Result<PossessableId, PossessionError> {
        let original = self
            .registry
            .lookup(source)
            .ok_or(PossessionError::Unknown(source))?;

        let scale = original.base_scale();
        let pose = match &destination {
            Destination::Point(pose) => *pose,
            Destination::Anchor { .. } => original.transform.pose(),
        };

        let spawned = self.registry.allocate(
            original.prefab.clone(),
            Transform::new(pose.position, pose.rotation, scale),
        )?;
        let new_id = spawned.id;

        self.registry.mutate(new_id, |record| {
            let generation = record.transition(PossessionState::Free);
            self.broadcaster.broadcast(Packet::DuplicateBroadcast {
                request_id,
                new_id,
                source_prefab: record.prefab.clone(),
                position: record.transform.position,
                rotation: record.transform.rotation,
                scale: record.transform.scale,
                generation,
            });
            Ok(())
        })?;
        info!("Duplicated {} as {} ({})", source, new_id, original.prefab);

        if let Destination::Anchor {
            actor,
            anchor,
            params,
        } = destination
        {
            self.request_possession(request_id, new_id, actor)?;
            self.attach_to_anchor(new_id, actor, anchor, params)?;
        }

        Ok(new_id)
    }

    /// Places a short-lived claim on a free possessable.
    ///
    /// Reserving one's own reservation again only pushes its deadline out.
    pub fn reserve_possession(
        &self,
        id: PossessableId,
        actor: ActorId,
        now: Instant,
    ) -> Result<Generation, PossessionError> {
        let mut reservations = self.reservations.lock();

        let generation = self.registry.mutate(id, |record| match record.state {
            PossessionState::Free => {
                let generation = record.transition(PossessionState::Requested { actor });
                self.broadcaster.broadcast(Packet::Reserved {
                    id,
                    actor,
                    generation,
                });
                Ok(generation)
            }
            PossessionState::Requested { actor: reserver } if reserver == actor => {
                Ok(record.generation)
            }
            _ => Err(already_held(record, actor)),
        })?;

        reservations.insert(
            id,
            Reservation {
                actor,
                deadline: now + self.config.reservation_timeout,
            },
        );
        debug!("Actor {} reserved {} (generation {})", actor, id, generation);
        Ok(generation)
    }

    /// Returns lapsed reservations to `Free`
    pub fn expire_reservations(&self, now: Instant) -> Vec<PossessableId> {
        let mut reservations = self.reservations.lock();
        let mut lapsed: Vec<(PossessableId, ActorId)> = reservations
            .iter()
            .filter(|(_, reservation)| reservation.deadline <= now)
            .map(|(id, reservation)| (*id, reservation.actor))
            .collect();
        lapsed.sort_by_key(|(id, _)| *id);

        let mut expired = Vec::new();
        for (id, actor) in lapsed {
            reservations.remove(&id);
            match self.free_if_held_by(id, actor, |state| {
                *state == PossessionState::Requested { actor }
            }) {
                Ok(_) => {
                    info!("Reservation of {} by actor {} expired", id, actor);
                    expired.push(id);
                }
                Err(e) => debug!("Reservation of {} already superseded: {}", id, e),
            }
        }
        expired
    }

    /// Moves a possessable to a new resting pose.
    ///
    /// Attached objects cannot be relocated; the record always ends `Free`
    /// at the target pose with its resting scale.
    pub fn relocate(
        &self,
        id: PossessableId,
        actor: ActorId,
        pose: Pose,
    ) -> Result<Generation, PossessionError> {
        let holdings = self.holdings_of(actor);
        let mut owned = holdings.lock();
        let mut reservations = self.reservations.lock();

        let result = self.registry.mutate(id, |record| {
            match &record.state {
                PossessionState::Free => {}
                PossessionState::Requested { actor: holder }
                | PossessionState::Owned { actor: holder }
                    if *holder == actor => {}
                PossessionState::Attached { actor: holder, .. } if *holder == actor => {
                    return Err(PossessionError::NotOwner { id, actor });
                }
                _ => return Err(already_held(record, actor)),
            }

            let scale = record.base_scale();
            record.original = None;
            record.transform = Transform::new(pose.position, pose.rotation, scale);
            let generation = record.transition(PossessionState::Free);
            self.broadcaster.broadcast(Packet::RelocateBroadcast {
                id,
                pose,
                generation,
            });
            Ok(generation)
        });

        let generation = match result {
            Ok(generation) => generation,
            Err(e) => {
                warn!("Refused relocation of {} by actor {}: {}", id, actor, e);
                return Err(e);
            }
        };

        owned.remove(&id);
        reservations.remove(&id);
        info!("Relocated {} (generation {})", id, generation);
        Ok(generation)
    }

    /// Frees everything an actor holds or has reserved
    pub fn release_all(&self, actor: ActorId) -> Vec<PossessableId> {
        let holdings = self.holdings_of(actor);
        let mut owned = holdings.lock();
        let mut reservations = self.reservations.lock();

        let mut ids: BTreeSet<PossessableId> = std::mem::take(&mut *owned);
        reservations.retain(|id, reservation| {
            if reservation.actor == actor {
                ids.insert(*id);
                false
            } else {
                true
            }
        });

        let released: Vec<PossessableId> = ids
            .into_iter()
            .filter(|id| {
                self.free_if_held_by(*id, actor, |_| true)
                    .map_err(|e| debug!("Skipping {} while releasing actor {}: {}", id, actor, e))
                    .is_ok()
            })
            .collect();

        if !released.is_empty() {
            info!("Released {} possessables of actor {}", released.len(), actor);
        }
        released
    }

    /// Current state of every record, for late joiners
    pub fn snapshot(&self) -> Vec<PossessionRecord> {
        self.registry.snapshot()
    }

    /// Possessables currently owned by `actor`
    pub fn holdings(&self, actor: ActorId) -> Vec<PossessableId> {
        self.holdings
            .read()
            .get(&actor)
            .map(|held| held.lock().iter().copied().collect())
            .unwrap_or_default()
    }

    fn free_if_held_by<F>(
        &self,
        id: PossessableId,
        actor: ActorId,
        accept: F,
    ) -> Result<Generation, PossessionError>
    where
        F: FnOnce(&PossessionState) -> bool,
    {
        self.registry.mutate(id, |record| {
            if record.holder() != Some(actor) || !accept(&record.state) {
                return Err(PossessionError::NotOwner { id, actor });
            }
            let generation = record.reset_to_free();
            self.broadcaster.broadcast(Packet::ReleaseBroadcast {
                id,
                generation,
                transform: record.transform,
                consumed: false,
            });
            Ok(generation)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PrefabCatalog;
    use shared::{PrefabRef, Quat, Vec3};

    fn arbiter() -> OwnershipArbiter<Arc<RecordingBroadcaster>> {
        let catalog = PrefabCatalog::new()
            .with_prefab("lantern", Vec3::one())
            .with_prefab("candle", Vec3::one());
        let registry = Arc::new(ObjectRegistry::new(catalog));
        for raw in [7, 42] {
            registry
                .register(
                    PossessableId(raw),
                    PrefabRef::new("lantern"),
                    Transform::new(Vec3::new(raw as f32, 0.0, 0.0), Quat::identity(), Vec3::new(0.5, 0.5, 0.5)),
                )
                .unwrap();
        }
        OwnershipArbiter::new(
            registry,
            Arc::new(RecordingBroadcaster::new()),
            ArbiterConfig::default(),
        )
    }

    const ID: PossessableId = PossessableId(42);

    #[test]
    fn test_busy_actor_does_not_block_others() {
        let arbiter = Arc::new(arbiter());
        let busy = arbiter.holdings_of(1);
        let _guard = busy.lock();

        let (tx, rx) = std::sync::mpsc::channel();
        let worker = Arc::clone(&arbiter);
        std::thread::spawn(move || {
            let _ = tx.send(worker.request_possession(1, PossessableId(7), 2));
        });

        let grant = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("request queued behind another actor");
        assert_eq!(grant.unwrap().actor, 2);
        assert_eq!(arbiter.holdings(2), vec![PossessableId(7)]);
    }

    #[test]
    fn test_grant_then_deny_then_release_then_regrant() {
        let arbiter = arbiter();

        let grant = arbiter.request_possession(1, ID, 1).unwrap();
        assert_eq!(grant.generation, 1);

        let denied = arbiter.request_possession(2, ID, 2);
        assert_eq!(
            denied,
            Err(PossessionError::AlreadyHeld { id: ID, holder: 1 })
        );

        let ack = arbiter.release_possession(3, ID, 1, false).unwrap();
        assert_eq!(ack.generation, 2);
        assert!(arbiter.registry().lookup(ID).unwrap().is_free());

        let regrant = arbiter.request_possession(4, ID, 2).unwrap();
        assert_eq!(regrant.actor, 2);
        assert_eq!(regrant.generation, 3);
    }

    #[test]
    fn test_grant_is_broadcast() {
        let arbiter = arbiter();
        arbiter.request_possession(5, ID, 1).unwrap();

        assert_eq!(
            arbiter.broadcaster().drain(),
            vec![Packet::Grant {
                request_id: 5,
                id: ID,
                actor: 1,
                generation: 1
            }]
        );
    }

    #[test]
    fn test_denial_is_not_broadcast() {
        let arbiter = arbiter();
        arbiter.request_possession(1, ID, 1).unwrap();
        arbiter.broadcaster().drain();

        assert!(arbiter.request_possession(2, ID, 2).is_err());
        assert!(arbiter.broadcaster().is_empty());
    }

    #[test]
    fn test_request_own_object_again() {
        let arbiter = arbiter();
        arbiter.request_possession(1, ID, 1).unwrap();
        assert!(matches!(
            arbiter.request_possession(2, ID, 1),
            Err(PossessionError::AlreadyHeld { holder: 1, .. })
        ));
    }

    #[test]
    fn test_capacity_full() {
        let arbiter = arbiter();
        arbiter.request_possession(1, ID, 1).unwrap();
        assert_eq!(
            arbiter.request_possession(2, PossessableId(7), 1),
            Err(PossessionError::Full { actor: 1 })
        );
        assert!(arbiter.registry().lookup(PossessableId(7)).unwrap().is_free());
    }

    #[test]
    fn test_unknown_id() {
        let arbiter = arbiter();
        assert_eq!(
            arbiter.request_possession(1, PossessableId(999), 1),
            Err(PossessionError::Unknown(PossessableId(999)))
        );
    }

    #[test]
    fn test_release_by_non_owner_changes_nothing() {
        let arbiter = arbiter();
        arbiter.request_possession(1, ID, 1).unwrap();
        let before = arbiter.registry().lookup(ID).unwrap();

        assert_eq!(
            arbiter.release_possession(2, ID, 2, false),
            Err(PossessionError::NotOwner { id: ID, actor: 2 })
        );
        assert_eq!(arbiter.registry().lookup(ID).unwrap(), before);
    }

    #[test]
    fn test_repeated_release_is_idempotent() {
        let arbiter = arbiter();
        arbiter.request_possession(1, ID, 1).unwrap();
        arbiter.release_possession(2, ID, 1, false).unwrap();
        let after_first = arbiter.registry().lookup(ID).unwrap();

        assert!(arbiter.release_possession(3, ID, 1, false).is_err());
        assert_eq!(arbiter.registry().lookup(ID).unwrap(), after_first);
    }

    #[test]
    fn test_release_restores_transform() {
        let arbiter = arbiter();
        let before = arbiter.registry().lookup(ID).unwrap().transform;

        arbiter.request_possession(1, ID, 1).unwrap();
        arbiter
            .attach_to_anchor(ID, 1, AnchorId::hand(), AttachParams::default())
            .unwrap();
        arbiter.release_possession(2, ID, 1, false).unwrap();

        let record = arbiter.registry().lookup(ID).unwrap();
        assert_eq!(record.transform, before);
        assert!(record.original.is_none());
    }

    #[test]
    fn test_consume_despawns() {
        let arbiter = arbiter();
        arbiter.request_possession(1, ID, 1).unwrap();
        let ack = arbiter.release_possession(2, ID, 1, true).unwrap();

        assert!(ack.consumed);
        assert!(arbiter.registry().lookup(ID).is_none());
        assert!(arbiter.holdings(1).is_empty());
        assert!(matches!(
            arbiter.broadcaster().drain().last(),
            Some(Packet::ReleaseBroadcast { consumed: true, .. })
        ));
    }

    #[test]
    fn test_attach_broadcast_carries_parameters() {
        let arbiter = arbiter();
        arbiter.request_possession(1, ID, 1).unwrap();
        arbiter.broadcaster().drain();

        let params = AttachParams {
            offset: Vec3::new(0.0, 0.1, 0.3),
            rotation: Vec3::new(0.0, 90.0, 0.0),
            scale: 0.8,
        };
        let grant = arbiter
            .attach_to_anchor(ID, 1, AnchorId::hand(), params)
            .unwrap();
        assert_eq!(grant.generation, 2);

        match arbiter.broadcaster().drain().as_slice() {
            [Packet::AttachBroadcast(update)] => {
                assert_eq!(update.params, params);
                assert_eq!(update.owned_since, 1);
                assert_eq!(update.base_scale, Vec3::new(0.5, 0.5, 0.5));
                assert_eq!(update.generation, 2);
            }
            other => panic!("Unexpected broadcasts: {:?}", other),
        }
    }

    #[test]
    fn test_attach_requires_ownership() {
        let arbiter = arbiter();
        assert_eq!(
            arbiter.attach_to_anchor(ID, 1, AnchorId::hand(), AttachParams::default()),
            Err(PossessionError::NotOwner { id: ID, actor: 1 })
        );
    }

    #[test]
    fn test_duplicate_to_point() {
        let arbiter = arbiter();
        arbiter.request_possession(1, ID, 1).unwrap();
        arbiter.broadcaster().drain();
        let source_before = arbiter.registry().lookup(ID).unwrap();

        let target = Pose::at(Vec3::new(10.0, 1.0, 0.0));
        let new_id = arbiter
            .duplicate_and_relocate(9, ID, Destination::Point(target))
            .unwrap();

        assert_ne!(new_id, ID);
        assert_eq!(arbiter.registry().lookup(ID).unwrap(), source_before);

        let copy = arbiter.registry().lookup(new_id).unwrap();
        assert!(copy.is_free());
        assert_eq!(copy.generation, 1);
        assert_eq!(copy.transform.position, target.position);
        assert_eq!(copy.transform.scale, Vec3::new(0.5, 0.5, 0.5));

        assert!(matches!(
            arbiter.broadcaster().drain().as_slice(),
            [Packet::DuplicateBroadcast { request_id: 9, generation: 1, .. }]
        ));
    }

    #[test]
    fn test_duplicate_to_anchor() {
        let arbiter = arbiter();
        let new_id = arbiter
            .duplicate_and_relocate(
                3,
                ID,
                Destination::Anchor {
                    actor: 2,
                    anchor: AnchorId::hand(),
                    params: AttachParams::default(),
                },
            )
            .unwrap();

        let copy = arbiter.registry().lookup(new_id).unwrap();
        assert_eq!(copy.owner(), Some(2));
        assert_eq!(copy.generation, 3);
        assert_eq!(arbiter.broadcaster().len(), 3);
    }

    #[test]
    fn test_duplicate_unknown_source() {
        let arbiter = arbiter();
        assert_eq!(
            arbiter.duplicate_and_relocate(1, PossessableId(1234), Destination::Point(Pose::default())),
            Err(PossessionError::Unknown(PossessableId(1234)))
        );
        assert_eq!(arbiter.registry().len(), 2);
    }

    #[test]
    fn test_reservation_then_confirm() {
        let arbiter = arbiter();
        let now = Instant::now();

        assert_eq!(arbiter.reserve_possession(ID, 1, now), Ok(1));
        assert!(matches!(
            arbiter.request_possession(1, ID, 2),
            Err(PossessionError::AlreadyHeld { holder: 1, .. })
        ));

        let grant = arbiter.request_possession(2, ID, 1).unwrap();
        assert_eq!(grant.generation, 2);
        assert!(arbiter
            .expire_reservations(now + Duration::from_secs(60))
            .is_empty());
    }

    #[test]
    fn test_reservation_expires() {
        let arbiter = arbiter();
        let now = Instant::now();
        arbiter.reserve_possession(ID, 1, now).unwrap();

        assert!(arbiter.expire_reservations(now + Duration::from_secs(1)).is_empty());
        let expired = arbiter.expire_reservations(now + Duration::from_secs(6));
        assert_eq!(expired, vec![ID]);

        let record = arbiter.registry().lookup(ID).unwrap();
        assert!(record.is_free());
        assert_eq!(record.generation, 2);
    }

    #[test]
    fn test_rereserve_refreshes_without_transition() {
        let arbiter = arbiter();
        let now = Instant::now();
        arbiter.reserve_possession(ID, 1, now).unwrap();
        let later = now + Duration::from_secs(4);
        assert_eq!(arbiter.reserve_possession(ID, 1, later), Ok(1));

        assert!(arbiter.expire_reservations(now + Duration::from_secs(6)).is_empty());
        assert_eq!(
            arbiter.expire_reservations(later + Duration::from_secs(5)),
            vec![ID]
        );
    }

    #[test]
    fn test_relocate_owned_object() {
        let arbiter = arbiter();
        arbiter.request_possession(1, ID, 1).unwrap();

        let pose = Pose::at(Vec3::new(3.0, 0.0, 3.0));
        assert_eq!(arbiter.relocate(ID, 1, pose), Ok(2));

        let record = arbiter.registry().lookup(ID).unwrap();
        assert!(record.is_free());
        assert_eq!(record.transform.position, pose.position);
        assert_eq!(record.transform.scale, Vec3::new(0.5, 0.5, 0.5));
        assert!(arbiter.holdings(1).is_empty());
    }

    #[test]
    fn test_relocate_refusals() {
        let arbiter = arbiter();
        arbiter.request_possession(1, ID, 1).unwrap();
        assert!(matches!(
            arbiter.relocate(ID, 2, Pose::default()),
            Err(PossessionError::AlreadyHeld { holder: 1, .. })
        ));

        arbiter
            .attach_to_anchor(ID, 1, AnchorId::hand(), AttachParams::default())
            .unwrap();
        assert_eq!(
            arbiter.relocate(ID, 1, Pose::default()),
            Err(PossessionError::NotOwner { id: ID, actor: 1 })
        );
    }

    #[test]
    fn test_release_all() {
        let arbiter = arbiter();
        arbiter.request_possession(1, ID, 1).unwrap();
        arbiter
            .reserve_possession(PossessableId(7), 1, Instant::now())
            .unwrap();

        let released = arbiter.release_all(1);
        assert_eq!(released, vec![PossessableId(7), ID]);
        assert!(arbiter.registry().snapshot().iter().all(|r| r.is_free()));
        assert!(arbiter.release_all(1).is_empty());
    }
}
