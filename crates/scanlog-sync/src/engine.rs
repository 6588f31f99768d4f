use crate::machine::{self, Transition};
use crate::reconcile::{MergeReport, merge_cloud};
use parking_lot::Mutex;
use scanlog_api::{RemoteAdapter, RemoteRecord};
use scanlog_core::{ErrorKind, Record, ScanError, ScanResult, SyncState};
use scanlog_fs::PushMode;
use scanlog_store::RecordStore;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The record store as shared between the engine and its callers. The lock
/// is never held across an `.await`.
pub type SharedStore = Arc<Mutex<RecordStore>>;

pub fn shared_store(store: RecordStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub pushed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub pushed: usize,
    pub failed: usize,
    pub added: usize,
    pub updated: usize,
    pub reconciled_missing: usize,
    pub left_in_cloud: usize,
    pub evicted: usize,
}

/// Result of a gated operation. A trigger that arrives while another sync is
/// in flight does nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "report", rename_all = "snake_case")]
pub enum SyncAttempt<T> {
    Completed(T),
    AlreadyRunning,
}

/// What happened to a single record in the push phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    /// The remote took the record. `confirmed` is false when the remote's
    /// answer could not be read and success was assumed.
    Pushed { confirmed: bool },
    Failed { error: ScanError },
    /// Not pushable right now: already synced, or another push owns it.
    Skipped { state: SyncState },
    /// Deleted before its push could start.
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromoteReport {
    pub record: Record,
    pub evicted: Vec<Record>,
}

#[derive(Debug, Default)]
struct SyncGate {
    running: AtomicBool,
}

struct GateGuard<'a> {
    gate: &'a SyncGate,
}

impl SyncGate {
    fn try_acquire(&self) -> Option<GateGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| GateGuard { gate: self })
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.running.store(false, Ordering::Release);
    }
}

pub struct SyncEngine {
    remote: Arc<dyn RemoteAdapter>,
    store: SharedStore,
    token: String,
    push_mode: PushMode,
    gate: SyncGate,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteAdapter>, store: SharedStore, token: impl Into<String>) -> Self {
        Self {
            remote,
            store,
            token: token.into(),
            push_mode: PushMode::default(),
            gate: SyncGate::default(),
        }
    }

    pub fn with_push_mode(mut self, push_mode: PushMode) -> Self {
        self.push_mode = push_mode;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// True while a full sync or push-only pass holds the gate.
    pub fn is_syncing(&self) -> bool {
        self.gate.running.load(Ordering::Acquire)
    }

    /// Push every pending or failed record, pull the cloud listing, merge it
    /// and re-apply the capacity bound.
    ///
    /// `Unauthorized` aborts at whichever phase it occurs. A transient pull
    /// failure aborts the merge but keeps the push results.
    pub async fn full_sync(&self) -> ScanResult<SyncAttempt<SyncReport>> {
        let Some(_guard) = self.gate.try_acquire() else {
            tracing::debug!("full sync requested while another sync is running");
            return Ok(SyncAttempt::AlreadyRunning);
        };

        let push = self.push_phase().await?;

        let cloud = match self.remote.pull_all(&self.token).await {
            Ok(cloud) => cloud,
            Err(error) if error.kind == ErrorKind::Unauthorized => return Err(error),
            Err(error) => {
                tracing::warn!(
                    pushed = push.pushed,
                    failed = push.failed,
                    "pull failed; merge skipped: {}",
                    error.message
                );
                return Err(ScanError::new(
                    error.kind,
                    format!(
                        "{} (pushed {} record(s) before the pull failed; run the sync again to merge)",
                        error.message, push.pushed
                    ),
                ));
            }
        };

        let listed = cloud.len();
        let (merge, evicted) = {
            let mut store = self.store.lock();
            let capacity = store.capacity();
            let merge: MergeReport = store.batch(|batch| merge_cloud(batch, cloud, capacity));
            let evicted = store.enforce_capacity();
            (merge, evicted.len())
        };

        let report = SyncReport {
            pushed: push.pushed,
            failed: push.failed,
            added: merge.added,
            updated: merge.updated,
            reconciled_missing: merge.reconciled_missing,
            left_in_cloud: merge.left_in_cloud,
            evicted,
        };
        tracing::info!(
            listed,
            pushed = report.pushed,
            failed = report.failed,
            added = report.added,
            updated = report.updated,
            reconciled_missing = report.reconciled_missing,
            left_in_cloud = report.left_in_cloud,
            evicted = report.evicted,
            "full sync finished"
        );

        Ok(SyncAttempt::Completed(report))
    }

    /// The push phase of a full sync on its own.
    pub async fn push_only(&self) -> ScanResult<SyncAttempt<PushReport>> {
        let Some(_guard) = self.gate.try_acquire() else {
            tracing::debug!("push requested while another sync is running");
            return Ok(SyncAttempt::AlreadyRunning);
        };

        let report = self.push_phase().await?;
        tracing::info!(pushed = report.pushed, failed = report.failed, "push finished");
        Ok(SyncAttempt::Completed(report))
    }

    /// Opportunistic push of one record, e.g. right after capture or relabel.
    ///
    /// Transport failures are reported in the outcome and leave the record in
    /// `Error`; only `Unauthorized` and a missing id are returned as errors.
    pub async fn push_record(&self, id: &str) -> ScanResult<PushOutcome> {
        if !self.store.lock().contains(id) {
            return Err(ScanError::not_found(id));
        }

        self.push_one(id).await
    }

    /// Cloud records that are not in the local store, newest first, flagged
    /// as remote-only. The store is not touched.
    pub async fn peek_cloud(&self) -> ScanResult<Vec<Record>> {
        let cloud = self.remote.pull_all(&self.token).await?;
        Ok(self.remote_only(cloud))
    }

    /// Brings a remote-only record into the store as `Synced`.
    ///
    /// Refused with `Usage`, storing nothing, when the capacity check would
    /// drop the record straight away.
    pub fn promote(&self, mut record: Record) -> ScanResult<PromoteReport> {
        record.origin_flag = false;
        record.sync_state = SyncState::Synced;

        let mut store = self.store.lock();
        if store.contains(&record.id) {
            return Err(ScanError::duplicate_id(&record.id));
        }
        if !store.admits(&record) {
            return Err(ScanError::usage(format!(
                "record {} is older than every synced record kept within capacity {}; raise it with `scanlog profile set --capacity <N>` to restore it",
                record.id,
                store.capacity()
            )));
        }

        let evicted = store.insert(record.clone())?;
        Ok(PromoteReport { record, evicted })
    }

    /// Peeks the cloud and promotes the record with `id`.
    pub async fn restore(&self, id: &str) -> ScanResult<PromoteReport> {
        if self.store.lock().contains(id) {
            return Err(ScanError::duplicate_id(id));
        }

        let candidate = self
            .peek_cloud()
            .await?
            .into_iter()
            .find(|record| record.id == id)
            .ok_or_else(|| ScanError::not_found(id))?;

        self.promote(candidate)
    }

    async fn push_phase(&self) -> ScanResult<PushReport> {
        let candidates = self.store.lock().pushable_ids();
        if candidates.is_empty() {
            return Ok(PushReport::default());
        }

        match self.push_mode {
            PushMode::PerRecord => self.push_each(&candidates).await,
            PushMode::Batch => self.push_together(&candidates).await,
        }
    }

    async fn push_each(&self, candidates: &[String]) -> ScanResult<PushReport> {
        let mut report = PushReport::default();
        for id in candidates {
            match self.push_one(id).await? {
                PushOutcome::Pushed { .. } => report.pushed += 1,
                PushOutcome::Failed { .. } => report.failed += 1,
                PushOutcome::Skipped { .. } | PushOutcome::Deleted => {}
            }
        }
        Ok(report)
    }

    async fn push_one(&self, id: &str) -> ScanResult<PushOutcome> {
        let snapshot = {
            let mut store = self.store.lock();
            match machine::begin_sync(&mut store, id) {
                Transition::Applied { .. } => store.get(id),
                Transition::Unchanged { state } => return Ok(PushOutcome::Skipped { state }),
                Transition::Missing => None,
            }
        };
        let Some(snapshot) = snapshot else {
            return Ok(PushOutcome::Deleted);
        };

        let result = self.remote.push_one(&snapshot, &self.token).await;

        let mut store = self.store.lock();
        match result {
            Ok(ack) => {
                settle_pushed(&mut store, &snapshot);
                if !ack.confirmed {
                    tracing::debug!(id, "remote answer unreadable; assuming the push landed");
                }
                Ok(PushOutcome::Pushed {
                    confirmed: ack.confirmed,
                })
            }
            Err(error) => {
                machine::fail_sync(&mut store, id);
                if error.kind == ErrorKind::Unauthorized {
                    return Err(error);
                }
                tracing::warn!(id, "push failed: {}", error.message);
                Ok(PushOutcome::Failed { error })
            }
        }
    }

    async fn push_together(&self, candidates: &[String]) -> ScanResult<PushReport> {
        let snapshots: Vec<Record> = {
            let mut store = self.store.lock();
            let mut snapshots = Vec::with_capacity(candidates.len());
            for id in candidates {
                if machine::begin_sync(&mut store, id).is_applied()
                    && let Some(record) = store.get(id)
                {
                    snapshots.push(record);
                }
            }
            snapshots
        };
        if snapshots.is_empty() {
            return Ok(PushReport::default());
        }

        let result = self.remote.push_batch(&snapshots, &self.token).await;

        let mut store = self.store.lock();
        match result {
            Ok(ack) => {
                for snapshot in &snapshots {
                    settle_pushed(&mut store, snapshot);
                }
                tracing::debug!(
                    added = ack.added,
                    updated = ack.updated,
                    confirmed = ack.confirmed,
                    "batch push accepted"
                );
                Ok(PushReport {
                    pushed: snapshots.len(),
                    failed: 0,
                })
            }
            Err(error) => {
                for snapshot in &snapshots {
                    machine::fail_sync(&mut store, &snapshot.id);
                }
                if error.kind == ErrorKind::Unauthorized {
                    return Err(error);
                }
                tracing::warn!(records = snapshots.len(), "batch push failed: {}", error.message);
                Ok(PushReport {
                    pushed: 0,
                    failed: snapshots.len(),
                })
            }
        }
    }

    fn remote_only(&self, cloud: Vec<RemoteRecord>) -> Vec<Record> {
        let store = self.store.lock();
        let mut seen = HashSet::new();
        let mut records: Vec<Record> = cloud
            .into_iter()
            .filter(|remote| !store.contains(&remote.id) && seen.insert(remote.id.clone()))
            .map(|remote| Record {
                origin_flag: true,
                ..remote.into_record()
            })
            .collect();

        records.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        records
    }
}

/// Marks a pushed record `Synced`, unless it was edited while the push was in
/// flight, in which case it goes back to `Pending` for the next pass.
fn settle_pushed(store: &mut RecordStore, snapshot: &Record) {
    if let Transition::Missing = machine::complete_sync(store, &snapshot.id) {
        tracing::debug!(id = %snapshot.id, "record deleted during its push");
        return;
    }

    let edited = store
        .get(&snapshot.id)
        .is_some_and(|current| current.label != snapshot.label || current.payload != snapshot.payload);
    if edited {
        machine::mark_dirty(store, &snapshot.id);
    }
}
