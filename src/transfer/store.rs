//! In-memory record store, partitioned by transfer kind

use super::record::{StatusPatch, TransferKind, TransferRecord};
use crate::error::{TransferError, TransferResult};

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Partitions {
    icp: Vec<TransferRecord>,
    bridge: Vec<TransferRecord>,
    swap: Vec<TransferRecord>,
    index: HashMap<String, (TransferKind, usize)>,
}

impl Partitions {
    fn partition(&self, kind: TransferKind) -> &Vec<TransferRecord> {
        match kind {
            TransferKind::Icp => &self.icp,
            TransferKind::Bridge => &self.bridge,
            TransferKind::Swap => &self.swap,
        }
    }

    fn partition_mut(&mut self, kind: TransferKind) -> &mut Vec<TransferRecord> {
        match kind {
            TransferKind::Icp => &mut self.icp,
            TransferKind::Bridge => &mut self.bridge,
            TransferKind::Swap => &mut self.swap,
        }
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut TransferRecord> {
        let (kind, pos) = *self.index.get(id)?;
        self.partition_mut(kind).get_mut(pos)
    }

    fn push(&mut self, record: TransferRecord) {
        let kind = record.kind();
        let id = record.id().to_string();
        let partition = self.partition_mut(kind);
        partition.push(record);
        let pos = partition.len() - 1;
        self.index.insert(id, (kind, pos));
    }
}

/// Every known transfer record, kept in insertion order per kind.
///
/// Records are never deleted. Mutation goes through status patches so the
/// monotonic status rules apply to every writer.
#[derive(Default)]
pub struct RecordStore {
    inner: RwLock<Partitions>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly submitted record
    pub async fn insert(&self, record: TransferRecord) -> TransferResult<()> {
        let mut inner = self.inner.write().await;
        if inner.index.contains_key(record.id()) {
            return Err(TransferError::Internal(format!(
                "record {} already exists",
                record.id()
            )));
        }
        debug!("Stored {} record {}", record.kind(), record.id());
        inner.push(record);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<TransferRecord> {
        let inner = self.inner.read().await;
        let (kind, pos) = *inner.index.get(id)?;
        inner.partition(kind).get(pos).cloned()
    }

    /// Apply a patch to a stored record, returning the updated copy and
    /// whether anything changed
    pub async fn apply_patch(
        &self,
        id: &str,
        patch: &StatusPatch,
    ) -> TransferResult<(TransferRecord, bool)> {
        let mut inner = self.inner.write().await;
        let record = inner
            .get_mut(id)
            .ok_or_else(|| TransferError::NotFound { id: id.to_string() })?;

        let changed = record.apply_patch(patch)?;
        Ok((record.clone(), changed))
    }

    /// Merge a record reported by the remote.
    ///
    /// Unknown records are inserted as-is. Known records absorb the remote's
    /// fields through the same monotonic patch rules as any other update.
    pub async fn upsert_remote(&self, mut record: TransferRecord) -> TransferResult<bool> {
        let mut inner = self.inner.write().await;

        let Some(existing) = inner.get_mut(record.id()) else {
            debug!("Ingested remote {} record {}", record.kind(), record.id());
            inner.push(record);
            return Ok(true);
        };

        if existing.kind() != record.kind() {
            return Err(TransferError::Internal(format!(
                "record {} reported as {} but stored as {}",
                record.id(),
                record.kind(),
                existing.kind()
            )));
        }

        let owner = record.owner().map(str::to_string);
        // a rejected patch leaves the stored record untouched, owner included
        let mut changed = existing.apply_patch(&patch_from(&mut record))?;
        if let Some(owner) = owner {
            changed |= existing.owner().is_none();
            existing.set_owner_if_missing(&owner);
        }
        Ok(changed)
    }

    /// Snapshot of one partition in insertion order
    pub async fn list(&self, kind: TransferKind) -> Vec<TransferRecord> {
        self.inner.read().await.partition(kind).clone()
    }

    /// Snapshot of all partitions as `(icp, bridge, swap)`
    pub async fn partitions(
        &self,
    ) -> (Vec<TransferRecord>, Vec<TransferRecord>, Vec<TransferRecord>) {
        let inner = self.inner.read().await;
        (inner.icp.clone(), inner.bridge.clone(), inner.swap.clone())
    }

    /// Records that have not reached a terminal status
    pub async fn in_flight(&self) -> Vec<TransferRecord> {
        let inner = self.inner.read().await;
        inner
            .icp
            .iter()
            .chain(inner.bridge.iter())
            .chain(inner.swap.iter())
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.index.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Status-bearing fields of a full record, as a patch
fn patch_from(record: &mut TransferRecord) -> StatusPatch {
    match record {
        TransferRecord::Icp(t) => StatusPatch {
            status: Some(t.status),
            completed_at: t.completed_at,
            target_tx_hash: t.target_tx_hash.take(),
            error: t.error.take(),
            ..Default::default()
        },
        TransferRecord::Bridge(b) => StatusPatch {
            status: Some(b.status),
            updated_at: Some(b.updated_at),
            completed_at: b.completed_at,
            target_tx_hash: b.target_tx_hash.take(),
            error: b.error.take(),
            transactions: None,
        },
        TransferRecord::Swap(s) => StatusPatch {
            status: Some(s.status),
            updated_at: Some(s.updated_at),
            completed_at: s.completed_at,
            target_tx_hash: None,
            error: s.error.take(),
            // no hop list means no hop information, not zero hops
            transactions: if s.transactions.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut s.transactions))
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::fixtures::{bridge, icp, ms};
    use crate::transfer::TransactionStatus;

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = RecordStore::new();
        store.insert(bridge("b1", 300)).await.unwrap();
        store.insert(icp("0xi1", 100)).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert_eq!(store.get("b1").await.unwrap().kind(), TransferKind::Bridge);
        assert_eq!(store.list(TransferKind::Icp).await.len(), 1);
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let store = RecordStore::new();
        store.insert(bridge("b1", 300)).await.unwrap();
        assert!(store.insert(bridge("b1", 400)).await.is_err());
        assert_eq!(store.get("b1").await.unwrap().effective_timestamp(), ms(300));
    }

    #[tokio::test]
    async fn test_patch_unknown_record() {
        let store = RecordStore::new();
        let err = store
            .apply_patch("nope", &StatusPatch::status(TransactionStatus::Confirmed))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_upsert_never_regresses_terminal_record() {
        let store = RecordStore::new();
        store.insert(bridge("b1", 300)).await.unwrap();
        store
            .apply_patch("b1", &StatusPatch::status(TransactionStatus::Confirmed))
            .await
            .unwrap();

        let mut stale = bridge("b1", 300);
        stale.set_owner_if_missing("0xabc");
        assert!(store.upsert_remote(stale).await.is_err());

        let stored = store.get("b1").await.unwrap();
        assert_eq!(stored.status(), TransactionStatus::Confirmed);
        assert_eq!(stored.owner(), None);
    }

    #[tokio::test]
    async fn test_upsert_fills_owner_and_progress() {
        let store = RecordStore::new();
        store.insert(bridge("b1", 300)).await.unwrap();

        let mut remote = bridge("b1", 300);
        remote.set_owner_if_missing("0xabc");
        if let TransferRecord::Bridge(b) = &mut remote {
            b.status = TransactionStatus::Processing;
        }
        assert!(store.upsert_remote(remote.clone()).await.unwrap());
        assert!(!store.upsert_remote(remote).await.unwrap());

        let stored = store.get("b1").await.unwrap();
        assert_eq!(stored.owner(), Some("0xabc"));
        assert_eq!(stored.status(), TransactionStatus::Processing);
    }

    #[tokio::test]
    async fn test_in_flight_excludes_terminal() {
        let store = RecordStore::new();
        store.insert(bridge("b1", 1)).await.unwrap();
        store.insert(bridge("b2", 2)).await.unwrap();
        store
            .apply_patch("b2", &StatusPatch::failed("reverted"))
            .await
            .unwrap();

        let ids: Vec<_> = store
            .in_flight()
            .await
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, vec!["b1"]);
    }
}
