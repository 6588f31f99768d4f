use crate::capacity::{admit_within_capacity, enforce_capacity};
use crate::storage::{MemoryStorage, Storage, storage_key};
use scanlog_core::{Record, ScanError, ScanResult, SyncState};
use serde::Serialize;
use std::collections::HashSet;

const RECORDS_ENTRY: &str = "records";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub error: usize,
}

/// The local record cache for one profile.
///
/// Records are kept in display order: `created_at` descending, and among
/// equal timestamps the most recently inserted first. Every successful
/// mutation writes the whole collection back to storage. A failed write is
/// remembered in [`RecordStore::persistence_error`] but the in-memory change
/// stands.
pub struct RecordStore {
    storage: Box<dyn Storage>,
    key: String,
    capacity: usize,
    records: Vec<Record>,
    persistence_error: Option<ScanError>,
}

/// Mutations applied under a single persistence write, without capacity
/// enforcement. See [`RecordStore::batch`].
pub struct Batch<'a> {
    records: &'a mut Vec<Record>,
    dirty: bool,
}

impl RecordStore {
    pub fn open<S>(storage: S, profile: &str, capacity: usize) -> ScanResult<Self>
    where
        S: Storage + 'static,
    {
        if capacity == 0 {
            return Err(ScanError::usage("record store capacity must be at least 1"));
        }

        let key = storage_key(profile, RECORDS_ENTRY);
        let (records, repaired) = match storage.read(&key)? {
            Some(raw) if !raw.trim().is_empty() => {
                let stored = serde_json::from_str::<Vec<Record>>(&raw).map_err(|err| {
                    ScanError::io(format!(
                        "failed to parse stored records under '{key}': {err}; run `scanlog sync full` after clearing the workspace state to rebuild"
                    ))
                })?;
                normalize_loaded(stored)
            }
            _ => (Vec::new(), false),
        };

        let mut store = Self {
            storage: Box::new(storage),
            key,
            capacity,
            records,
            persistence_error: None,
        };

        if repaired {
            tracing::info!(
                key = %store.key,
                "repaired stored records left mid-sync or duplicated"
            );
            store.persist();
        }

        Ok(store)
    }

    /// A store backed by a fresh [`MemoryStorage`].
    pub fn in_memory(capacity: usize) -> ScanResult<Self> {
        Self::open(MemoryStorage::new(), "default", capacity)
    }

    /// Adds `record` at its display position, then runs the capacity check.
    /// Returns whatever the capacity check evicted.
    pub fn insert(&mut self, record: Record) -> ScanResult<Vec<Record>> {
        check_insertable(&self.records, &record)?;
        insert_sorted(&mut self.records, record);

        let evicted = enforce_capacity(&mut self.records, self.capacity);
        log_evictions(&evicted, self.capacity);
        self.persist();
        Ok(evicted)
    }

    /// Whether `record` would still be stored once [`insert`](Self::insert)
    /// has run its capacity check.
    pub fn admits(&self, record: &Record) -> bool {
        let (_, refused) =
            admit_within_capacity(&self.records, vec![record.clone()], self.capacity);
        refused.is_empty()
    }

    /// Applies `mutator` to the record with `id` and returns the new value.
    pub fn update<F>(&mut self, id: &str, mutator: F) -> ScanResult<Record>
    where
        F: FnOnce(&mut Record),
    {
        let updated = update_in(&mut self.records, id, mutator)?;
        self.persist();
        Ok(updated)
    }

    /// Deletes the record whatever its state. Returns `false` when there was
    /// nothing to delete.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(position) = position_of(&self.records, id) else {
            return false;
        };

        self.records.remove(position);
        self.persist();
        true
    }

    /// Runs the capacity check outside of an insert.
    pub fn enforce_capacity(&mut self) -> Vec<Record> {
        let evicted = enforce_capacity(&mut self.records, self.capacity);
        if !evicted.is_empty() {
            log_evictions(&evicted, self.capacity);
            self.persist();
        }
        evicted
    }

    /// Runs `apply` against the collection and persists once afterwards if
    /// anything changed. Capacity is not enforced.
    pub fn batch<T, F>(&mut self, apply: F) -> T
    where
        F: FnOnce(&mut Batch<'_>) -> T,
    {
        let mut batch = Batch {
            records: &mut self.records,
            dirty: false,
        };
        let output = apply(&mut batch);
        let dirty = batch.dirty;
        if dirty {
            self.persist();
        }
        output
    }

    pub fn all(&self) -> Vec<Record> {
        self.records.clone()
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.records.iter().find(|record| record.id == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        position_of(&self.records, id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ids eligible for the push phase, oldest first.
    pub fn pushable_ids(&self) -> Vec<String> {
        self.records
            .iter()
            .rev()
            .filter(|record| record.sync_state.is_pushable())
            .map(|record| record.id.clone())
            .collect()
    }

    pub fn count_by_state(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for record in &self.records {
            match record.sync_state {
                SyncState::Pending => counts.pending += 1,
                SyncState::Syncing => counts.syncing += 1,
                SyncState::Synced => counts.synced += 1,
                SyncState::Error => counts.error += 1,
            }
        }
        counts
    }

    /// The last write failure, cleared by the next successful write.
    pub fn persistence_error(&self) -> Option<&ScanError> {
        self.persistence_error.as_ref()
    }

    fn persist(&mut self) {
        let result = serde_json::to_string(&self.records)
            .map_err(|err| ScanError::io(format!("failed to encode records: {err}")))
            .and_then(|encoded| self.storage.write(&self.key, &encoded));

        match result {
            Ok(()) => self.persistence_error = None,
            Err(error) => {
                tracing::warn!(
                    key = %self.key,
                    kind = ?error.kind,
                    "records kept in memory only: {}",
                    error.message
                );
                self.persistence_error = Some(error);
            }
        }
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("key", &self.key)
            .field("capacity", &self.capacity)
            .field("len", &self.records.len())
            .field("persistence_error", &self.persistence_error)
            .finish()
    }
}

impl Batch<'_> {
    pub fn insert(&mut self, record: Record) -> ScanResult<()> {
        check_insertable(self.records, &record)?;
        insert_sorted(self.records, record);
        self.dirty = true;
        Ok(())
    }

    pub fn update<F>(&mut self, id: &str, mutator: F) -> ScanResult<Record>
    where
        F: FnOnce(&mut Record),
    {
        let updated = update_in(self.records, id, mutator)?;
        self.dirty = true;
        Ok(updated)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let Some(position) = position_of(self.records, id) else {
            return false;
        };
        self.records.remove(position);
        self.dirty = true;
        true
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn records(&self) -> &[Record] {
        self.records.as_slice()
    }
}

fn check_insertable(records: &[Record], record: &Record) -> ScanResult<()> {
    if record.origin_flag {
        return Err(ScanError::usage(format!(
            "record '{}' was fetched from the remote only; promote it instead of inserting",
            record.id
        )));
    }
    if position_of(records, &record.id).is_some() {
        return Err(ScanError::duplicate_id(&record.id));
    }
    Ok(())
}

pub(crate) fn insert_sorted(records: &mut Vec<Record>, record: Record) {
    let position = records.partition_point(|existing| existing.created_at > record.created_at);
    records.insert(position, record);
}

fn update_in<F>(records: &mut Vec<Record>, id: &str, mutator: F) -> ScanResult<Record>
where
    F: FnOnce(&mut Record),
{
    let position = position_of(records, id).ok_or_else(|| ScanError::not_found(id))?;

    let mut candidate = records[position].clone();
    mutator(&mut candidate);
    if candidate.id != id {
        return Err(ScanError::usage(format!(
            "record ids are immutable; refusing to rename '{id}' to '{}'",
            candidate.id
        )));
    }

    if candidate.created_at == records[position].created_at {
        records[position] = candidate.clone();
    } else {
        records.remove(position);
        insert_sorted(records, candidate.clone());
    }

    Ok(candidate)
}

fn position_of(records: &[Record], id: &str) -> Option<usize> {
    records.iter().position(|record| record.id == id)
}

/// Sorts into display order, resets interrupted pushes and drops repeated
/// ids. Returns whether anything had to be repaired.
fn normalize_loaded(stored: Vec<Record>) -> (Vec<Record>, bool) {
    let mut repaired = false;
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(stored.len());

    for mut record in stored {
        if !seen.insert(record.id.clone()) {
            repaired = true;
            continue;
        }
        if record.sync_state == SyncState::Syncing {
            record.sync_state = SyncState::Pending;
            repaired = true;
        }
        if record.origin_flag {
            record.origin_flag = false;
            repaired = true;
        }
        records.push(record);
    }

    // Stable, so stored tie order survives.
    records.sort_by(|left, right| right.created_at.cmp(&left.created_at));
    (records, repaired)
}

fn log_evictions(evicted: &[Record], capacity: usize) {
    if evicted.is_empty() {
        return;
    }
    tracing::info!(
        evicted = evicted.len(),
        capacity,
        "evicted oldest synced records over capacity"
    );
}
