//! Mirror groups that relay a held possessable into a linked group
//!
//! Sending an item does not move it: the arbiter spawns a copy at the linked
//! group's destination and the source record stays as it was. Requests are
//! remembered per `(actor, request_id)` so a retried datagram never spawns a
//! second copy.

use crate::arbiter::{Broadcaster, OwnershipArbiter};
use log::{debug, info, warn};
use shared::{ActorId, Destination, Pose, PossessableId, PossessionError, RequestId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

const RECENT_REQUESTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Occupant {
    id: PossessableId,
    since: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorGroup {
    pub id: String,
    /// Group that receives copies sent from this one
    pub linked: String,
    /// Where copies arriving in this group are placed
    pub destination: Pose,
    occupant: Option<Occupant>,
}

impl MirrorGroup {
    pub fn new(id: &str, linked: &str, destination: Pose) -> Self {
        Self {
            id: id.to_string(),
            linked: linked.to_string(),
            destination,
            occupant: None,
        }
    }

    pub fn occupant(&self) -> Option<PossessableId> {
        self.occupant.map(|o| o.id)
    }

    pub fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }
}

/// Result of a relay request
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// Copy spawned under this id
    Spawned(PossessableId),
    /// Refused; the requester is told why
    Rejected(PossessionError),
    /// Nothing to relay; no reply is sent
    Dropped,
}

pub struct MirrorRelay<B: Broadcaster> {
    arbiter: Arc<OwnershipArbiter<B>>,
    groups: HashMap<String, MirrorGroup>,
    recent: HashMap<(ActorId, RequestId), RelayOutcome>,
    recent_order: VecDeque<(ActorId, RequestId)>,
    occupancy_timeout: Duration,
}

impl<B: Broadcaster> MirrorRelay<B> {
    pub fn new(arbiter: Arc<OwnershipArbiter<B>>, occupancy_timeout: Duration) -> Self {
        Self {
            arbiter,
            groups: HashMap::new(),
            recent: HashMap::new(),
            recent_order: VecDeque::new(),
            occupancy_timeout,
        }
    }

    pub fn add_group(&mut self, group: MirrorGroup) {
        debug!("Mirror group {} linked to {}", group.id, group.linked);
        self.groups.insert(group.id.clone(), group);
    }

    pub fn group(&self, id: &str) -> Option<&MirrorGroup> {
        self.groups.get(id)
    }

    /// Copies `source` into the group linked to `from_group`.
    ///
    /// The actor must own the source. A repeated `(actor, request_id)`
    /// returns the first outcome without touching anything.
    pub fn send_item(
        &mut self,
        actor: ActorId,
        request_id: RequestId,
        source: PossessableId,
        from_group: &str,
        now: Instant,
    ) -> RelayOutcome {
        let key = (actor, request_id);
        if let Some(outcome) = self.recent.get(&key) {
            debug!(
                "Relay request {} from actor {} already handled",
                request_id, actor
            );
            return outcome.clone();
        }

        let outcome = self.relay(actor, request_id, source, from_group, now);
        self.remember(key, outcome.clone());
        outcome
    }

    fn relay(
        &mut self,
        actor: ActorId,
        request_id: RequestId,
        source: PossessableId,
        from_group: &str,
        now: Instant,
    ) -> RelayOutcome {
        let Some(record) = self.arbiter.registry().lookup(source) else {
            warn!("Relay of unknown possessable {} aborted", source);
            return RelayOutcome::Dropped;
        };
        let Some(linked) = self.groups.get(from_group).map(|g| g.linked.clone()) else {
            warn!("Relay from unknown mirror group '{}' aborted", from_group);
            return RelayOutcome::Dropped;
        };
        if record.owner() != Some(actor) {
            return RelayOutcome::Rejected(PossessionError::NotOwner { id: source, actor });
        }

        let destination = match self.groups.get(&linked) {
            Some(group) if group.is_occupied() => {
                return RelayOutcome::Rejected(PossessionError::Occupied { group: linked });
            }
            Some(group) => group.destination,
            None => {
                warn!("Mirror group '{}' links to missing group '{}'", from_group, linked);
                return RelayOutcome::Dropped;
            }
        };

        match self
            .arbiter
            .duplicate_and_relocate(request_id, source, Destination::Point(destination))
        {
            Ok(new_id) => {
                if let Some(group) = self.groups.get_mut(&linked) {
                    group.occupant = Some(Occupant {
                        id: new_id,
                        since: now,
                    });
                }
                info!(
                    "Relayed {} from '{}' to '{}' as {}",
                    source, from_group, linked, new_id
                );
                RelayOutcome::Spawned(new_id)
            }
            Err(e) => RelayOutcome::Rejected(e),
        }
    }

    fn remember(&mut self, key: (ActorId, RequestId), outcome: RelayOutcome) {
        self.recent.insert(key, outcome);
        self.recent_order.push_back(key);
        while self.recent_order.len() > RECENT_REQUESTS {
            if let Some(old) = self.recent_order.pop_front() {
                self.recent.remove(&old);
            }
        }
    }

    /// Frees the group a consumed copy was sitting in
    pub fn on_consumed(&mut self, id: PossessableId) -> Option<String> {
        let group = self
            .groups
            .values_mut()
            .find(|group| group.occupant() == Some(id))?;
        group.occupant = None;
        info!("Mirror group '{}' freed by consumption of {}", group.id, id);
        Some(group.id.clone())
    }

    /// Frees groups whose occupant has sat there longer than the timeout
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        let mut freed = Vec::new();
        for group in self.groups.values_mut() {
            if let Some(occupant) = group.occupant {
                if now.saturating_duration_since(occupant.since) >= self.occupancy_timeout {
                    group.occupant = None;
                    freed.push(group.id.clone());
                }
            }
        }
        freed.sort();
        if !freed.is_empty() {
            debug!("Mirror groups freed by timeout: {:?}", freed);
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::{ArbiterConfig, RecordingBroadcaster};
    use crate::registry::{ObjectRegistry, PrefabCatalog};
    use shared::{Packet, PrefabRef, Transform, Vec3};

    const SOURCE: PossessableId = PossessableId(10);

    fn relay() -> MirrorRelay<Arc<RecordingBroadcaster>> {
        let registry = Arc::new(ObjectRegistry::new(
            PrefabCatalog::new().with_prefab("candle", Vec3::one()),
        ));
        registry
            .register(SOURCE, PrefabRef::new("candle"), Transform::identity())
            .unwrap();
        let arbiter = Arc::new(OwnershipArbiter::new(
            registry,
            Arc::new(RecordingBroadcaster::new()),
            ArbiterConfig::default(),
        ));
        arbiter.request_possession(1, SOURCE, 1).unwrap();

        let mut relay = MirrorRelay::new(arbiter, Duration::from_secs(30));
        relay.add_group(MirrorGroup::new("west", "east", Pose::at(Vec3::new(-5.0, 0.0, 0.0))));
        relay.add_group(MirrorGroup::new("east", "west", Pose::at(Vec3::new(5.0, 0.0, 0.0))));
        relay
    }

    #[test]
    fn test_send_spawns_copy_in_linked_group() {
        let mut relay = relay();
        let now = Instant::now();

        let outcome = relay.send_item(1, 7, SOURCE, "west", now);
        let RelayOutcome::Spawned(new_id) = outcome else {
            panic!("Expected a spawn, got {:?}", outcome);
        };

        assert_eq!(relay.group("east").unwrap().occupant(), Some(new_id));
        assert!(!relay.group("west").unwrap().is_occupied());

        let copy = relay.arbiter.registry().lookup(new_id).unwrap();
        assert_eq!(copy.transform.position, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(relay.arbiter.registry().lookup(SOURCE).unwrap().owner(), Some(1));
    }

    #[test]
    fn test_retried_request_is_idempotent() {
        let mut relay = relay();
        let now = Instant::now();

        let first = relay.send_item(1, 7, SOURCE, "west", now);
        relay.arbiter.broadcaster().drain();
        let second = relay.send_item(1, 7, SOURCE, "west", now);

        assert_eq!(first, second);
        assert_eq!(relay.arbiter.registry().len(), 2);
        assert!(relay.arbiter.broadcaster().is_empty());
    }

    #[test]
    fn test_occupied_destination() {
        let mut relay = relay();
        let now = Instant::now();
        relay.send_item(1, 1, SOURCE, "west", now);

        assert_eq!(
            relay.send_item(1, 2, SOURCE, "west", now),
            RelayOutcome::Rejected(PossessionError::Occupied {
                group: "east".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_source_is_dropped_silently() {
        let mut relay = relay();
        let outcome = relay.send_item(1, 3, PossessableId(999), "west", Instant::now());
        assert_eq!(outcome, RelayOutcome::Dropped);
        assert!(relay.arbiter.broadcaster().drain().iter().all(|p| matches!(p, Packet::Grant { .. })));
    }

    #[test]
    fn test_non_owner_rejected() {
        let mut relay = relay();
        assert_eq!(
            relay.send_item(2, 1, SOURCE, "west", Instant::now()),
            RelayOutcome::Rejected(PossessionError::NotOwner { id: SOURCE, actor: 2 })
        );
    }

    #[test]
    fn test_consumption_frees_group() {
        let mut relay = relay();
        let RelayOutcome::Spawned(new_id) = relay.send_item(1, 1, SOURCE, "west", Instant::now())
        else {
            panic!("Expected a spawn");
        };

        assert_eq!(relay.on_consumed(new_id), Some("east".to_string()));
        assert!(!relay.group("east").unwrap().is_occupied());
        assert_eq!(relay.on_consumed(new_id), None);
    }

    #[test]
    fn test_sweep_frees_stale_occupants() {
        let mut relay = relay();
        let now = Instant::now();
        relay.send_item(1, 1, SOURCE, "west", now);

        assert!(relay.sweep(now + Duration::from_secs(10)).is_empty());
        assert_eq!(relay.sweep(now + Duration::from_secs(31)), vec!["east".to_string()]);
    }

    #[test]
    fn test_recent_requests_are_bounded() {
        let mut relay = relay();
        let now = Instant::now();
        for request_id in 0..(RECENT_REQUESTS as u32 + 10) {
            relay.send_item(1, request_id, PossessableId(999), "west", now);
        }
        assert_eq!(relay.recent.len(), RECENT_REQUESTS);
        assert!(!relay.recent.contains_key(&(1, 0)));
    }
}
