//! History aggregator - one time-ordered view over all transfer kinds
//!
//! Ordering is newest first by effective timestamp (`createdAt`, or
//! `timestamp` for ICP transfers). Equal timestamps keep partition order:
//! ICP, then bridge, then swap, each in insertion order. The limit applies
//! after the merge.

use crate::channel::{self, MessageChannel, MessageType};
use crate::config::HistoryConfig;
use crate::error::TransferResult;
use crate::transfer::{
    BridgeTransaction, IcpTransfer, RecordStore, SwapTransaction, TransferKind, TransferRecord,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which partitions a history query covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Icp,
    Bridge,
    Swap,
    #[default]
    All,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Icp => "icp",
            HistoryKind::Bridge => "bridge",
            HistoryKind::Swap => "swap",
            HistoryKind::All => "all",
        }
    }

    pub fn includes(&self, kind: TransferKind) -> bool {
        matches!(
            (self, kind),
            (HistoryKind::All, _)
                | (HistoryKind::Icp, TransferKind::Icp)
                | (HistoryKind::Bridge, TransferKind::Bridge)
                | (HistoryKind::Swap, TransferKind::Swap)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    #[serde(default)]
    pub kind: HistoryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: HistoryKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One page of merged history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub items: Vec<TransferRecord>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

/// Merge the three partitions into one list, newest first.
///
/// Kind filtering happens before the sort and the limit truncates the merged
/// result, never the individual partitions.
pub fn merge_history(
    icp: &[TransferRecord],
    bridge: &[TransferRecord],
    swap: &[TransferRecord],
    kind: HistoryKind,
    limit: Option<usize>,
) -> Vec<TransferRecord> {
    let mut merged: Vec<TransferRecord> = icp
        .iter()
        .chain(bridge)
        .chain(swap)
        .filter(|r| kind.includes(r.kind()))
        .cloned()
        .collect();

    // sort_by is stable, so ties keep partition order
    merged.sort_by(|a, b| b.effective_timestamp().cmp(&a.effective_timestamp()));

    if let Some(limit) = limit {
        merged.truncate(limit);
    }
    merged
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteHistory {
    #[serde(default)]
    icp_transfers: Vec<Value>,
    #[serde(default)]
    bridge_transactions: Vec<Value>,
    #[serde(default)]
    swap_transactions: Vec<Value>,
    /// Mixed list from older remotes, discriminated by shape
    #[serde(default)]
    transfers: Vec<Value>,
}

impl RemoteHistory {
    fn into_records(self) -> Vec<TransferRecord> {
        let mut records = Vec::new();
        records.extend(decode_each::<IcpTransfer>(self.icp_transfers).map(TransferRecord::Icp));
        records.extend(
            decode_each::<BridgeTransaction>(self.bridge_transactions).map(TransferRecord::Bridge),
        );
        records.extend(
            decode_each::<SwapTransaction>(self.swap_transactions).map(TransferRecord::Swap),
        );
        records.extend(self.transfers.into_iter().filter_map(|value| {
            TransferRecord::from_untagged(value)
                .map_err(|e| warn!("Skipping malformed history record: {}", e))
                .ok()
        }));
        records
    }
}

/// Decode each item on its own so one bad record does not sink the list
fn decode_each<T: DeserializeOwned>(values: Vec<Value>) -> impl Iterator<Item = T> {
    values.into_iter().filter_map(|value| {
        serde_json::from_value(value)
            .map_err(|e| warn!("Skipping malformed history record: {}", e))
            .ok()
    })
}

/// Read side over the record store, topped up from the remote
pub struct HistoryAggregator {
    channel: Arc<dyn MessageChannel>,
    store: Arc<RecordStore>,
    config: HistoryConfig,
}

impl HistoryAggregator {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        store: Arc<RecordStore>,
        config: HistoryConfig,
    ) -> Self {
        Self {
            channel,
            store,
            config,
        }
    }

    /// Requested limit, defaulted and clamped to the configured maximum
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_limit)
            .min(self.config.max_limit)
    }

    /// Merged history for an address, newest first
    pub async fn get_history(&self, filter: &HistoryFilter) -> TransferResult<Vec<TransferRecord>> {
        let limit = self.effective_limit(filter.limit);
        let mut merged = self.collect(filter).await;
        merged.truncate(limit);
        Ok(merged)
    }

    /// Same ordering as [`get_history`](Self::get_history), one page at a time
    pub async fn get_history_page(
        &self,
        filter: &HistoryFilter,
        offset: usize,
    ) -> TransferResult<HistoryPage> {
        let limit = self.effective_limit(filter.limit);
        let merged = self.collect(filter).await;
        let total = merged.len();

        let items: Vec<TransferRecord> = merged.into_iter().skip(offset).take(limit).collect();
        let has_more = offset.saturating_add(items.len()) < total;

        Ok(HistoryPage {
            items,
            total,
            offset,
            limit,
            has_more,
        })
    }

    async fn collect(&self, filter: &HistoryFilter) -> Vec<TransferRecord> {
        crate::metrics::record_history_request(filter.kind.as_str());

        if let Some(address) = &filter.address {
            self.sync_remote(address, filter.kind).await;
        }

        let (icp, bridge, swap) = self.store.partitions().await;
        let owned = |records: Vec<TransferRecord>| -> Vec<TransferRecord> {
            match &filter.address {
                Some(address) => records
                    .into_iter()
                    .filter(|r| r.owner().map_or(true, |o| o.eq_ignore_ascii_case(address)))
                    .collect(),
                None => records,
            }
        };

        merge_history(&owned(icp), &owned(bridge), &owned(swap), filter.kind, None)
    }

    /// Pull the remote's history for `address` into the store.
    ///
    /// A failed fetch contributes nothing; local records are still served.
    async fn sync_remote(&self, address: &str, kind: HistoryKind) {
        let payload = serde_json::json!({ "address": address, "kind": kind });
        let remote: RemoteHistory = match channel::request(
            self.channel.as_ref(),
            MessageType::GetCrosschainHistory,
            &payload,
        )
        .await
        {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Loading remote history for {} failed: {}", address, e);
                return;
            }
        };

        let mut ingested = 0usize;
        for mut record in remote.into_records() {
            record.set_owner_if_missing(address);
            let id = record.id().to_string();
            match self.store.upsert_remote(record).await {
                Ok(true) => ingested += 1,
                Ok(false) => {}
                Err(e) => warn!("Keeping local copy of {}: {}", id, e),
            }
        }
        debug!("Ingested {} remote history records for {}", ingested, address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockMessageChannel;
    use crate::error::TransferError;
    use crate::transfer::fixtures::{bridge, icp, ms, swap};
    use crate::transfer::{StatusPatch, TransactionStatus};
    use serde_json::json;

    fn config() -> HistoryConfig {
        HistoryConfig {
            default_limit: 50,
            max_limit: 500,
        }
    }

    fn ids(records: &[TransferRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id()).collect()
    }

    fn offline_channel() -> MockMessageChannel {
        let mut channel = MockMessageChannel::new();
        channel.expect_send().returning(|mt, _| {
            Err(TransferError::Remote {
                message_type: mt,
                message: "history service unavailable".to_string(),
            })
        });
        channel
    }

    #[test]
    fn test_merge_is_global_then_truncated() {
        let merged = merge_history(
            &[icp("i100", 100)],
            &[bridge("b300", 300)],
            &[swap("s200", 200, &[])],
            HistoryKind::All,
            Some(2),
        );
        assert_eq!(ids(&merged), vec!["b300", "s200"]);
    }

    #[test]
    fn test_merge_length_and_order() {
        let icps = vec![icp("i1", 5), icp("i2", 50)];
        let bridges = vec![bridge("b1", 20), bridge("b2", 20), bridge("b3", 1)];
        let swaps = vec![swap("s1", 20, &[])];

        for limit in [0, 3, 6, 100] {
            let merged = merge_history(&icps, &bridges, &swaps, HistoryKind::All, Some(limit));
            assert_eq!(merged.len(), limit.min(6));
            for pair in merged.windows(2) {
                assert!(pair[0].effective_timestamp() >= pair[1].effective_timestamp());
            }
        }

        // equal timestamps keep partition and insertion order
        let merged = merge_history(&icps, &bridges, &swaps, HistoryKind::All, None);
        assert_eq!(ids(&merged), vec!["i2", "b1", "b2", "s1", "i1", "b3"]);
    }

    #[test]
    fn test_kind_filter_applies_before_limit() {
        let merged = merge_history(
            &[icp("i1", 900)],
            &[bridge("b1", 10), bridge("b2", 20)],
            &[swap("s1", 800, &[])],
            HistoryKind::Bridge,
            Some(1),
        );
        assert_eq!(ids(&merged), vec!["b2"]);
    }

    #[tokio::test]
    async fn test_limit_is_defaulted_and_clamped() {
        let aggregator = HistoryAggregator::new(
            Arc::new(offline_channel()),
            Arc::new(RecordStore::new()),
            HistoryConfig {
                default_limit: 2,
                max_limit: 3,
            },
        );
        assert_eq!(aggregator.effective_limit(None), 2);
        assert_eq!(aggregator.effective_limit(Some(1)), 1);
        assert_eq!(aggregator.effective_limit(Some(1_000)), 3);
    }

    #[tokio::test]
    async fn test_remote_failure_serves_local_records() {
        let store = Arc::new(RecordStore::new());
        store.insert(bridge("b1", 10)).await.unwrap();
        let aggregator = HistoryAggregator::new(Arc::new(offline_channel()), store, config());

        let history = aggregator
            .get_history(&HistoryFilter::all().address("0xabc"))
            .await
            .unwrap();
        assert_eq!(ids(&history), vec!["b1"]);
    }

    #[tokio::test]
    async fn test_remote_history_is_ingested_for_owner() {
        let mut channel = MockMessageChannel::new();
        channel
            .expect_send()
            .withf(|mt, payload| {
                *mt == MessageType::GetCrosschainHistory && payload["address"] == "0xABC"
            })
            .returning(|_, _| {
                Ok(json!({
                    "icpTransfers": [
                        {"txHash": "0xi", "sourceChain": "a", "targetChain": "b",
                         "status": "completed", "timestamp": 400}
                    ],
                    "bridgeTransactions": [
                        {"id": "b1", "provider": "p1", "fromChain": "a", "toChain": "b",
                         "fromAsset": "usdx", "toAsset": "usdx", "fromAmount": "100",
                         "toAmount": "99", "sourceTxHash": "0xb1", "status": "processing",
                         "createdAt": 10, "updatedAt": 30},
                        {"garbage": true}
                    ],
                    "swapTransactions": []
                }))
            });

        let store = Arc::new(RecordStore::new());
        store.insert(bridge("b1", 10)).await.unwrap();
        let mut foreign = bridge("b2", 500);
        foreign.set_owner_if_missing("0xother");
        store.insert(foreign).await.unwrap();

        let aggregator = HistoryAggregator::new(Arc::new(channel), store.clone(), config());
        let history = aggregator
            .get_history(&HistoryFilter::all().address("0xABC"))
            .await
            .unwrap();

        assert_eq!(ids(&history), vec!["0xi", "b1"]);
        assert_eq!(history[0].status(), TransactionStatus::Confirmed);
        assert_eq!(history[1].status(), TransactionStatus::Processing);
        assert_eq!(store.get("0xi").await.unwrap().owner(), Some("0xABC"));
    }

    #[tokio::test]
    async fn test_stale_remote_record_does_not_regress_local() {
        let mut channel = MockMessageChannel::new();
        channel.expect_send().returning(|_, _| {
            Ok(json!({"transfers": [
                {"id": "b1", "provider": "p1", "fromChain": "a", "toChain": "b",
                 "fromAsset": "usdx", "toAsset": "usdx", "fromAmount": "100",
                 "toAmount": "99", "sourceTxHash": "0xb1", "status": "pending",
                 "createdAt": 10, "updatedAt": 10}
            ]}))
        });

        let store = Arc::new(RecordStore::new());
        store.insert(bridge("b1", 10)).await.unwrap();
        store
            .apply_patch("b1", &StatusPatch::status(TransactionStatus::Confirmed).at(ms(20)))
            .await
            .unwrap();

        let aggregator = HistoryAggregator::new(Arc::new(channel), store, config());
        let history = aggregator
            .get_history(&HistoryFilter::all().address("0xabc"))
            .await
            .unwrap();
        assert_eq!(history[0].status(), TransactionStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_pages_walk_the_merged_order() {
        let store = Arc::new(RecordStore::new());
        for (i, ts) in [10, 40, 30, 20, 50].iter().enumerate() {
            store.insert(bridge(&format!("b{}", i), *ts)).await.unwrap();
        }
        let aggregator = HistoryAggregator::new(Arc::new(offline_channel()), store, config());
        let filter = HistoryFilter::all().limit(2);

        let first = aggregator.get_history_page(&filter, 0).await.unwrap();
        assert_eq!(ids(&first.items), vec!["b4", "b1"]);
        assert_eq!(first.total, 5);
        assert!(first.has_more);

        let last = aggregator.get_history_page(&filter, 4).await.unwrap();
        assert_eq!(ids(&last.items), vec!["b0"]);
        assert!(!last.has_more);

        let page = serde_json::to_value(&last).unwrap();
        assert_eq!(page["hasMore"], false);
    }
}
