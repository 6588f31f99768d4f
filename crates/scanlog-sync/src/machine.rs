//! Per-record sync state transitions against a [`RecordStore`].
//!
//! Every transition looks the record up first, so a record deleted while its
//! push was in flight reports [`Transition::Missing`] and stays deleted.

use scanlog_core::{ScanResult, SyncState};
use scanlog_store::RecordStore;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    Applied { from: SyncState, to: SyncState },
    Unchanged { state: SyncState },
    Missing,
}

impl Transition {
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// `Synced -> Pending` after a local edit.
pub fn mark_dirty(store: &mut RecordStore, id: &str) -> Transition {
    apply(store, id, SyncState::dirty)
}

/// `Pending | Error -> Syncing` before a push.
pub fn begin_sync(store: &mut RecordStore, id: &str) -> Transition {
    apply(store, id, SyncState::begin)
}

pub fn complete_sync(store: &mut RecordStore, id: &str) -> Transition {
    apply(store, id, SyncState::complete)
}

pub fn fail_sync(store: &mut RecordStore, id: &str) -> Transition {
    apply(store, id, SyncState::fail)
}

/// `Error -> Pending`, the manual retry.
pub fn retry(store: &mut RecordStore, id: &str) -> Transition {
    apply(store, id, SyncState::retry)
}

/// Replaces the label, then marks the record dirty. Fails with `NotFound`
/// when the record is gone.
pub fn relabel(store: &mut RecordStore, id: &str, label: Option<String>) -> ScanResult<Transition> {
    store.update(id, |record| record.label = label)?;
    Ok(mark_dirty(store, id))
}

fn apply(
    store: &mut RecordStore,
    id: &str,
    step: fn(SyncState) -> Option<SyncState>,
) -> Transition {
    let Some(from) = store.get(id).map(|record| record.sync_state) else {
        return Transition::Missing;
    };

    let Some(to) = step(from) else {
        return Transition::Unchanged { state: from };
    };

    match store.update(id, |record| record.sync_state = to) {
        Ok(_) => Transition::Applied { from, to },
        Err(_) => Transition::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanlog_core::{ErrorKind, Record};

    fn store_with(state: SyncState) -> (RecordStore, String) {
        let mut store = RecordStore::in_memory(10).expect("store");
        let mut record = Record::capture_at("payload", 1);
        record.sync_state = state;
        let id = record.id.clone();
        store.insert(record).expect("insert");
        (store, id)
    }

    #[test]
    fn push_lifecycle_runs_pending_to_synced() {
        let (mut store, id) = store_with(SyncState::Pending);

        assert_eq!(
            begin_sync(&mut store, &id),
            Transition::Applied {
                from: SyncState::Pending,
                to: SyncState::Syncing
            }
        );
        assert_eq!(
            complete_sync(&mut store, &id),
            Transition::Applied {
                from: SyncState::Syncing,
                to: SyncState::Synced
            }
        );
        assert_eq!(
            begin_sync(&mut store, &id),
            Transition::Unchanged {
                state: SyncState::Synced
            }
        );
    }

    #[test]
    fn failed_records_can_be_retried_or_re_pushed() {
        let (mut store, id) = store_with(SyncState::Syncing);
        assert!(fail_sync(&mut store, &id).is_applied());
        assert_eq!(store.get(&id).map(|r| r.sync_state), Some(SyncState::Error));

        assert!(begin_sync(&mut store, &id).is_applied());
        assert!(fail_sync(&mut store, &id).is_applied());
        assert_eq!(
            retry(&mut store, &id),
            Transition::Applied {
                from: SyncState::Error,
                to: SyncState::Pending
            }
        );
    }

    #[test]
    fn mark_dirty_only_moves_synced_records() {
        let (mut store, id) = store_with(SyncState::Error);
        assert_eq!(
            mark_dirty(&mut store, &id),
            Transition::Unchanged {
                state: SyncState::Error
            }
        );

        let (mut store, id) = store_with(SyncState::Synced);
        assert!(mark_dirty(&mut store, &id).is_applied());
        assert_eq!(store.get(&id).map(|r| r.sync_state), Some(SyncState::Pending));
    }

    #[test]
    fn completion_after_deletion_does_not_resurrect() {
        let (mut store, id) = store_with(SyncState::Syncing);
        assert!(store.remove(&id));

        assert_eq!(complete_sync(&mut store, &id), Transition::Missing);
        assert_eq!(fail_sync(&mut store, &id), Transition::Missing);
        assert!(store.is_empty());
    }

    #[test]
    fn relabel_marks_synced_records_dirty() {
        let (mut store, id) = store_with(SyncState::Synced);

        let transition = relabel(&mut store, &id, Some("Pantry".to_string())).expect("relabel");
        assert!(transition.is_applied());

        let record = store.get(&id).expect("record");
        assert_eq!(record.label.as_deref(), Some("Pantry"));
        assert_eq!(record.sync_state, SyncState::Pending);

        let error = relabel(&mut store, "ghost", None).expect_err("missing");
        assert_eq!(error.kind, ErrorKind::NotFound);
    }
}
