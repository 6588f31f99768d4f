use crate::store::insert_sorted;
use scanlog_core::Record;
use std::collections::HashSet;

/// Ids of synced records to drop so that `records` fits in `capacity`,
/// oldest first.
///
/// `records` is expected in display order (newest first). Only `Synced`
/// records are candidates, so the result may be shorter than the overflow.
pub fn eviction_candidates(records: &[Record], capacity: usize) -> Vec<String> {
    let overflow = records.len().saturating_sub(capacity);
    if overflow == 0 {
        return Vec::new();
    }

    let mut synced: Vec<(usize, &Record)> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| record.sync_state.is_evictable())
        .collect();

    // Ascending age; on equal timestamps the record shown last goes first.
    synced.sort_by(|(left_pos, left), (right_pos, right)| {
        left.created_at
            .cmp(&right.created_at)
            .then(right_pos.cmp(left_pos))
    });

    synced
        .into_iter()
        .take(overflow)
        .map(|(_, record)| record.id.clone())
        .collect()
}

/// Removes overflow synced records in place and returns them oldest first.
pub fn enforce_capacity(records: &mut Vec<Record>, capacity: usize) -> Vec<Record> {
    let doomed = eviction_candidates(records, capacity);
    if doomed.is_empty() {
        return Vec::new();
    }

    let doomed_set: HashSet<&str> = doomed.iter().map(String::as_str).collect();
    let mut evicted = Vec::with_capacity(doomed.len());
    records.retain(|record| {
        if doomed_set.contains(record.id.as_str()) {
            evicted.push(record.clone());
            false
        } else {
            true
        }
    });

    evicted.sort_by(|left, right| {
        let left_rank = doomed.iter().position(|id| *id == left.id);
        let right_rank = doomed.iter().position(|id| *id == right.id);
        left_rank.cmp(&right_rank)
    });
    evicted
}

/// Splits `incoming` into the records that would survive being inserted into
/// `existing` one by one, and the ones the capacity check would evict on
/// arrival. Neither slice is modified.
///
/// `existing` is in display order; `incoming` is taken in insertion order.
pub fn admit_within_capacity(
    existing: &[Record],
    incoming: Vec<Record>,
    capacity: usize,
) -> (Vec<Record>, Vec<Record>) {
    if existing.len() + incoming.len() <= capacity {
        return (incoming, Vec::new());
    }

    let mut combined = existing.to_vec();
    for record in &incoming {
        insert_sorted(&mut combined, record.clone());
    }
    let doomed: HashSet<String> = eviction_candidates(&combined, capacity)
        .into_iter()
        .collect();

    incoming
        .into_iter()
        .partition(|record| !doomed.contains(&record.id))
}
