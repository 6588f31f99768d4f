use crate::wire::RemoteRecord;
use crate::{Ack, BatchAck, RemoteAdapter};
use async_trait::async_trait;
use parking_lot::Mutex;
use scanlog_core::{Record, ScanError, ScanResult};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// In-process remote with the webhook's upsert semantics.
///
/// Clones share state, so a test can keep one handle while the engine owns
/// another and still edit the "cloud" out of band.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<String, RemoteRecord>,
    accepted_token: Option<String>,
    failing_ids: HashSet<String>,
    next_pull_error: Option<ScanError>,
    push_calls: usize,
    pull_calls: usize,
    pushed_ids: Vec<String>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only `token` is accepted afterwards; anything else is `Unauthorized`.
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.inner.lock().accepted_token = Some(token.into());
        self
    }

    pub fn upsert(&self, record: RemoteRecord) {
        self.inner.lock().records.insert(record.id.clone(), record);
    }

    pub fn remove(&self, id: &str) -> bool {
        self.inner.lock().records.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<RemoteRecord> {
        self.inner.lock().records.get(id).cloned()
    }

    pub fn records(&self) -> Vec<RemoteRecord> {
        newest_first(&self.inner.lock().records)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Pushes carrying `id` fail with a transport error until cleared.
    pub fn fail_pushes_for(&self, id: &str) {
        self.inner.lock().failing_ids.insert(id.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.inner.lock();
        state.failing_ids.clear();
        state.next_pull_error = None;
    }

    pub fn fail_next_pull(&self, error: ScanError) {
        self.inner.lock().next_pull_error = Some(error);
    }

    pub fn push_calls(&self) -> usize {
        self.inner.lock().push_calls
    }

    pub fn pull_calls(&self) -> usize {
        self.inner.lock().pull_calls
    }

    /// Ids in the order the remote received them.
    pub fn pushed_ids(&self) -> Vec<String> {
        self.inner.lock().pushed_ids.clone()
    }
}

impl MemoryState {
    fn authorize(&self, token: &str) -> ScanResult<()> {
        match self.accepted_token.as_deref() {
            Some(expected) if expected != token => {
                Err(ScanError::unauthorized("webhook rejected the token: invalid token"))
            }
            _ => Ok(()),
        }
    }

    fn check_failures<'a>(&self, mut ids: impl Iterator<Item = &'a str>) -> ScanResult<()> {
        match ids.find(|id| self.failing_ids.contains(*id)) {
            Some(id) => Err(ScanError::transport(format!(
                "network request failed: simulated failure for '{id}'"
            ))),
            None => Ok(()),
        }
    }

    /// Returns `true` when the id was new.
    fn store(&mut self, record: &Record) -> bool {
        self.pushed_ids.push(record.id.clone());
        self.records
            .insert(record.id.clone(), RemoteRecord::from_record(record))
            .is_none()
    }
}

#[async_trait]
impl RemoteAdapter for MemoryRemote {
    async fn push_one(&self, record: &Record, token: &str) -> ScanResult<Ack> {
        let mut state = self.inner.lock();
        state.push_calls += 1;
        state.authorize(token)?;
        state.check_failures(std::iter::once(record.id.as_str()))?;
        state.store(record);

        Ok(Ack {
            id: record.id.clone(),
            confirmed: true,
        })
    }

    async fn push_batch(&self, records: &[Record], token: &str) -> ScanResult<BatchAck> {
        let mut state = self.inner.lock();
        state.push_calls += 1;
        state.authorize(token)?;
        state.check_failures(records.iter().map(|record| record.id.as_str()))?;

        let mut ack = BatchAck {
            confirmed: true,
            ..BatchAck::default()
        };
        for record in records {
            if state.store(record) {
                ack.added += 1;
            } else {
                ack.updated += 1;
            }
            ack.total_processed += 1;
        }

        Ok(ack)
    }

    async fn pull_all(&self, token: &str) -> ScanResult<Vec<RemoteRecord>> {
        let mut state = self.inner.lock();
        state.pull_calls += 1;
        state.authorize(token)?;
        if let Some(error) = state.next_pull_error.take() {
            return Err(error);
        }

        Ok(newest_first(&state.records))
    }
}

fn newest_first(records: &BTreeMap<String, RemoteRecord>) -> Vec<RemoteRecord> {
    let mut listed: Vec<RemoteRecord> = records.values().cloned().collect();
    listed.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
    listed
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanlog_core::ErrorKind;

    #[tokio::test]
    async fn batch_upsert_counts_added_and_updated() {
        let remote = MemoryRemote::new();
        let first = Record::capture_at("one", 1);
        let second = Record::capture_at("two", 2);

        let ack = remote
            .push_batch(&[first.clone()], "t")
            .await
            .expect("first batch");
        assert_eq!((ack.added, ack.updated), (1, 0));

        let ack = remote
            .push_batch(&[first, second], "t")
            .await
            .expect("second batch");
        assert_eq!((ack.added, ack.updated, ack.total_processed), (1, 1, 2));
        assert_eq!(remote.push_calls(), 2);

        let listed = remote.pull_all("t").await.expect("pull");
        assert_eq!(listed[0].data, "two");
        assert_eq!(listed[1].data, "one");
    }

    #[tokio::test]
    async fn wrong_token_is_unauthorized() {
        let remote = MemoryRemote::new().with_token("secret");
        let error = remote.pull_all("guess").await.expect_err("rejected");
        assert_eq!(error.kind, ErrorKind::Unauthorized);
        assert_eq!(remote.pull_calls(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_one_shot_for_pulls() {
        let remote = MemoryRemote::new();
        remote.fail_next_pull(ScanError::malformed("truncated body"));

        let error = remote.pull_all("t").await.expect_err("injected");
        assert_eq!(error.kind, ErrorKind::MalformedResponse);
        assert!(remote.pull_all("t").await.expect("recovered").is_empty());
    }
}
