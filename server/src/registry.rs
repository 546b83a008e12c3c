//! Authoritative store of possession records
//!
//! Records are locked individually so arbitration on one possessable never
//! waits on another. The outer map lock is only held exclusively while a
//! record is inserted or despawned.

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use shared::{PossessableId, PossessionError, PossessionRecord, PrefabRef, Transform, Vec3};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Prefab registered with the catalog at startup
#[derive(Debug, Clone, PartialEq)]
pub struct Prefab {
    pub name: PrefabRef,
    /// Scale new instances get when spawned without a source
    pub scale: Vec3,
}

/// Explicit name to prefab mapping, built once before the world loads
#[derive(Debug, Clone, Default)]
pub struct PrefabCatalog {
    prefabs: HashMap<PrefabRef, Prefab>,
}

impl PrefabCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefab(mut self, name: &str, scale: Vec3) -> Self {
        self.insert(name, scale);
        self
    }

    pub fn insert(&mut self, name: &str, scale: Vec3) {
        let name = PrefabRef::new(name);
        self.prefabs.insert(
            name.clone(),
            Prefab {
                name,
                scale,
            },
        );
    }

    /// Looks a prefab up by exact name; there is no fuzzy fallback
    pub fn resolve(&self, name: &PrefabRef) -> Result<&Prefab, PossessionError> {
        self.prefabs
            .get(name)
            .ok_or_else(|| PossessionError::UnknownPrefab(name.clone()))
    }

    pub fn len(&self) -> usize {
        self.prefabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefabs.is_empty()
    }
}

type Slot = Arc<Mutex<PossessionRecord>>;

/// Maps possessable ids to their current record
pub struct ObjectRegistry {
    records: RwLock<HashMap<PossessableId, Slot>>,
    next_id: AtomicU64,
    catalog: PrefabCatalog,
}

impl ObjectRegistry {
    pub fn new(catalog: PrefabCatalog) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            catalog,
        }
    }

    pub fn catalog(&self) -> &PrefabCatalog {
        &self.catalog
    }

    /// Registers a world-load possessable as `Free` with generation 0.
    ///
    /// Registering an id twice keeps the existing record.
    pub fn register(
        &self,
        id: PossessableId,
        prefab: PrefabRef,
        transform: Transform,
    ) -> Result<PossessionRecord, PossessionError> {
        self.catalog.resolve(&prefab)?;

        let mut records = self.records.write();
        if let Some(existing) = records.get(&id) {
            warn!("Possessable {} registered twice, keeping existing record", id);
            return Ok(existing.lock().clone());
        }

        self.next_id.fetch_max(id.0 + 1, Ordering::SeqCst);
        let record = PossessionRecord::new(id, prefab, transform);
        records.insert(id, Arc::new(Mutex::new(record.clone())));
        debug!("Registered possessable {} ({})", id, record.prefab);
        Ok(record)
    }

    /// Registers a new possessable under a fresh id above every known id
    pub fn allocate(
        &self,
        prefab: PrefabRef,
        transform: Transform,
    ) -> Result<PossessionRecord, PossessionError> {
        self.catalog.resolve(&prefab)?;

        let mut records = self.records.write();
        let mut id = PossessableId(self.next_id.fetch_add(1, Ordering::SeqCst));
        while records.contains_key(&id) {
            id = PossessableId(self.next_id.fetch_add(1, Ordering::SeqCst));
        }

        let record = PossessionRecord::new(id, prefab, transform);
        records.insert(id, Arc::new(Mutex::new(record.clone())));
        info!("Allocated possessable {} ({})", id, record.prefab);
        Ok(record)
    }

    pub fn lookup(&self, id: PossessableId) -> Option<PossessionRecord> {
        self.records.read().get(&id).map(|slot| slot.lock().clone())
    }

    /// Atomic read-modify-write of one record.
    ///
    /// `f` works on a copy that is committed only when it returns `Ok`, so a
    /// refused transition leaves the record exactly as it was.
    pub fn mutate<T, F>(&self, id: PossessableId, f: F) -> Result<T, PossessionError>
    where
        F: FnOnce(&mut PossessionRecord) -> Result<T, PossessionError>,
    {
        let records = self.records.read();
        let slot = records.get(&id).ok_or(PossessionError::Unknown(id))?;
        let mut record = slot.lock();

        let mut draft = record.clone();
        let result = f(&mut draft)?;
        debug_assert!(draft.generation >= record.generation);
        *record = draft;
        Ok(result)
    }

    /// Validates and despawns a record in one step.
    ///
    /// The record is removed only when `f` succeeds; the final state `f`
    /// produced is what the caller gets to broadcast.
    pub fn remove_with<T, F>(&self, id: PossessableId, f: F) -> Result<T, PossessionError>
    where
        F: FnOnce(&mut PossessionRecord) -> Result<T, PossessionError>,
    {
        let mut records = self.records.write();
        let result = {
            let slot = records.get(&id).ok_or(PossessionError::Unknown(id))?;
            let record = slot.lock();
            let mut draft = record.clone();
            f(&mut draft)?
        };
        records.remove(&id);
        info!("Despawned possessable {}", id);
        Ok(result)
    }

    /// Every record, ordered by id
    pub fn snapshot(&self) -> Vec<PossessionRecord> {
        let mut all: Vec<PossessionRecord> = self
            .records
            .read()
            .values()
            .map(|slot| slot.lock().clone())
            .collect();
        all.sort_by_key(|record| record.id);
        all
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
