//! Slot bookkeeping the possession controller reports to

use log::{debug, info};
use shared::{ActorId, DenyReason, PossessableId, PossessionError};

/// Inventory collaborator notified of possession outcomes
pub trait InventoryBridge {
    /// Possessable stored in `slot`, if any
    fn object_in_slot(&self, slot: usize) -> Option<PossessableId>;
    fn on_possession_granted(&mut self, slot: usize, id: PossessableId);
    fn on_possession_denied(&mut self, slot: usize, reason: DenyReason);
    /// The held object went back into its slot
    fn on_released(&mut self, slot: usize);
    /// The held object was used up and leaves the inventory
    fn on_consumed(&mut self, slot: usize, id: PossessableId);
}

/// Fixed-capacity slot inventory
#[derive(Debug, Clone)]
pub struct SlotInventory {
    actor: ActorId,
    slots: Vec<Option<PossessableId>>,
    held: Option<usize>,
    last_denial: Option<(usize, DenyReason)>,
}

impl SlotInventory {
    pub fn new(capacity: usize) -> Self {
        Self {
            actor: 0,
            slots: vec![None; capacity],
            held: None,
            last_denial: None,
        }
    }

    pub fn set_actor(&mut self, actor: ActorId) {
        self.actor = actor;
    }

    /// Stores `id` in the first empty slot.
    ///
    /// Fails with `Full` when every slot is taken; nothing is sent to the
    /// server either way.
    pub fn add(&mut self, id: PossessableId) -> Result<usize, PossessionError> {
        if let Some(slot) = self.slot_of(id) {
            return Ok(slot);
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(PossessionError::Full { actor: self.actor })?;
        self.slots[slot] = Some(id);
        debug!("Stored {} in slot {}", id, slot);
        Ok(slot)
    }

    pub fn slot_of(&self, id: PossessableId) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(id))
    }

    /// Slot whose object is currently in hand
    pub fn held_slot(&self) -> Option<usize> {
        self.held
    }

    pub fn last_denial(&self) -> Option<(usize, DenyReason)> {
        self.last_denial
    }

    pub fn slots(&self) -> &[Option<PossessableId>] {
        &self.slots
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
}

impl InventoryBridge for SlotInventory {
    fn object_in_slot(&self, slot: usize) -> Option<PossessableId> {
        self.slots.get(slot).copied().flatten()
    }

    fn on_possession_granted(&mut self, slot: usize, id: PossessableId) {
        info!("Took {} from slot {}", id, slot);
        self.held = Some(slot);
        self.last_denial = None;
    }

    fn on_possession_denied(&mut self, slot: usize, reason: DenyReason) {
        info!("Slot {} request denied: {:?}", slot, reason);
        self.last_denial = Some((slot, reason));
    }

    fn on_released(&mut self, slot: usize) {
        if self.held == Some(slot) {
            self.held = None;
        }
    }

    fn on_consumed(&mut self, slot: usize, id: PossessableId) {
        if self.held == Some(slot) {
            self.held = None;
        }
        if let Some(stored) = self.slots.get_mut(slot) {
            if *stored == Some(id) {
                *stored = None;
            }
        }
        info!("Used up {} from slot {}", id, slot);
    }
}
