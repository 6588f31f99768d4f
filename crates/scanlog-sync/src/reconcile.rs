use scanlog_api::RemoteRecord;
use scanlog_core::{Record, SyncState};
use scanlog_store::{Batch, admit_within_capacity};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub added: usize,
    pub updated: usize,
    pub reconciled_missing: usize,
    /// Cloud-only records not copied because the capacity check would have
    /// evicted them straight away.
    pub left_in_cloud: usize,
}

/// Folds the full cloud listing into the local collection. The cloud wins.
///
/// Known ids take the cloud's label, payload and category and become
/// `Synced`; they only count as updated when something actually changed.
/// Local `Synced` records that the cloud no longer lists go back to `Pending`
/// so the next push restores them. Unknown ids are added as `Synced`, except
/// those older than every synced record `capacity` leaves room for: those
/// stay in the cloud and are counted in `left_in_cloud`. When an id is listed
/// twice the first (newest) entry is used.
pub fn merge_cloud(
    batch: &mut Batch<'_>,
    cloud: Vec<RemoteRecord>,
    capacity: usize,
) -> MergeReport {
    let mut report = MergeReport::default();
    let mut listed: HashSet<String> = HashSet::with_capacity(cloud.len());
    let mut fresh = Vec::new();

    for remote in cloud {
        if !listed.insert(remote.id.clone()) {
            tracing::debug!(id = %remote.id, "ignoring repeated cloud entry");
            continue;
        }

        let incoming = remote.into_record();
        let changed = batch
            .get(&incoming.id)
            .map(|existing| differs_from_cloud(existing, &incoming));
        match changed {
            None => fresh.push(incoming),
            Some(true) => {
                let applied = batch.update(&incoming.id, |record| {
                    record.label = incoming.label.clone();
                    record.payload = incoming.payload.clone();
                    record.category = incoming.category;
                    record.sync_state = SyncState::Synced;
                });
                if applied.is_ok() {
                    report.updated += 1;
                }
            }
            Some(false) => {}
        }
    }

    let vanished: Vec<String> = batch
        .records()
        .iter()
        .filter(|record| record.sync_state == SyncState::Synced && !listed.contains(&record.id))
        .map(|record| record.id.clone())
        .collect();

    for id in vanished {
        if batch
            .update(&id, |record| record.sync_state = SyncState::Pending)
            .is_ok()
        {
            tracing::info!(id = %id, "synced record missing from the cloud; queued for re-push");
            report.reconciled_missing += 1;
        }
    }

    let (admitted, refused) = admit_within_capacity(batch.records(), fresh, capacity);
    for record in admitted {
        match batch.insert(record) {
            Ok(()) => report.added += 1,
            Err(error) => tracing::warn!("skipping cloud record: {}", error.message),
        }
    }

    report.left_in_cloud = refused.len();
    if !refused.is_empty() {
        tracing::debug!(
            left_in_cloud = refused.len(),
            capacity,
            "older cloud records not copied; local store is full"
        );
    }

    report
}

fn differs_from_cloud(local: &Record, cloud: &Record) -> bool {
    local.sync_state != SyncState::Synced
        || local.label != cloud.label
        || local.payload != cloud.payload
        || local.category != cloud.category
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanlog_store::RecordStore;

    fn wire(id: &str, timestamp: i64, name: &str, data: &str) -> RemoteRecord {
        RemoteRecord {
            id: id.to_string(),
            timestamp,
            name: name.to_string(),
            data: data.to_string(),
            kind: "TEXT".to_string(),
        }
    }

    fn local(id: &str, created_at: i64, state: SyncState) -> Record {
        Record {
            id: id.to_string(),
            sync_state: state,
            ..Record::capture_at(format!("payload-{id}"), created_at)
        }
    }

    #[test]
    fn cloud_values_overwrite_local_ones() {
        let mut store = RecordStore::in_memory(10).expect("store");
        store
            .insert(local("a", 1, SyncState::Pending).with_label(Some("A".to_string())))
            .expect("insert");

        let report = store.batch(|batch| merge_cloud(batch, vec![wire("a", 1, "B", "new body")], 10));

        assert_eq!(report.updated, 1);
        let merged = store.get("a").expect("merged");
        assert_eq!(merged.label.as_deref(), Some("B"));
        assert_eq!(merged.payload, "new body");
        assert_eq!(merged.sync_state, SyncState::Synced);
    }

    #[test]
    fn unchanged_synced_records_are_not_counted() {
        let mut store = RecordStore::in_memory(10).expect("store");
        store
            .insert(Record {
                label: None,
                ..local("a", 1, SyncState::Synced)
            })
            .expect("insert");

        let report =
            store.batch(|batch| merge_cloud(batch, vec![wire("a", 1, "", "payload-a")], 10));
        assert_eq!(report, MergeReport::default());
    }

    #[test]
    fn new_cloud_ids_are_added_and_missing_synced_ones_requeued() {
        let mut store = RecordStore::in_memory(10).expect("store");
        store.insert(local("gone", 1, SyncState::Synced)).expect("insert");
        store.insert(local("draft", 2, SyncState::Pending)).expect("insert");

        let report = store.batch(|batch| {
            merge_cloud(
                batch,
                vec![wire("fresh", 9, "", "from cloud"), wire("fresh", 3, "", "stale copy")],
                10,
            )
        });

        assert_eq!(
            report,
            MergeReport {
                added: 1,
                updated: 0,
                reconciled_missing: 1,
                left_in_cloud: 0,
            }
        );
        assert_eq!(store.get("fresh").map(|r| r.payload), Some("from cloud".to_string()));
        assert_eq!(store.get("gone").map(|r| r.sync_state), Some(SyncState::Pending));
        assert_eq!(store.get("draft").map(|r| r.sync_state), Some(SyncState::Pending));
    }

    #[test]
    fn cloud_records_that_would_be_evicted_on_arrival_stay_remote() {
        let mut store = RecordStore::in_memory(2).expect("store");
        store.insert(local("kept", 10, SyncState::Synced)).expect("insert");
        store.insert(local("draft", 1, SyncState::Pending)).expect("insert");

        let cloud = vec![
            wire("kept", 10, "", "payload-kept"),
            wire("newer", 20, "", "fresh"),
            wire("older", 5, "", "stale"),
        ];
        let report = store.batch(|batch| merge_cloud(batch, cloud, 2));

        assert_eq!((report.added, report.left_in_cloud), (1, 1));
        assert!(store.get("newer").is_some());
        assert!(store.get("older").is_none());

        let evicted = store.enforce_capacity();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, "kept");
        assert!(store.contains("draft"));
    }
}
