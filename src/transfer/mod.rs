//! Transfer records and their lifecycle

mod manager;
mod record;
mod request;
mod store;

pub use manager::{PatchOutcome, TransferManager};
pub use record::{
    derive_swap_status, BridgeTransaction, HopTransaction, IcpTransfer, StatusPatch,
    SwapTransaction, TransactionStatus, TransferKind, TransferRecord,
};
pub use request::{BridgeTransferRequest, IcpTransferRequest, SwapRequest, TransferRequest};
pub use store::RecordStore;

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::catalog::Amount;
    use crate::composer::fixtures::step;
    use crate::composer::Route;
    use chrono::{DateTime, TimeZone, Utc};

    pub fn ms(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    /// Pending p1 bridge a -> b moving 100 usdx
    pub fn bridge(id: &str, created_ms: i64) -> TransferRecord {
        TransferRecord::Bridge(BridgeTransaction {
            id: id.to_string(),
            provider: "p1".to_string(),
            from_chain: "a".to_string(),
            to_chain: "b".to_string(),
            from_asset: "usdx".to_string(),
            to_asset: "usdx".to_string(),
            from_amount: Amount(100),
            to_amount: Amount(99),
            source_tx_hash: format!("0x{}", id),
            target_tx_hash: None,
            status: TransactionStatus::Pending,
            created_at: ms(created_ms),
            updated_at: ms(created_ms),
            completed_at: None,
            error: None,
            owner: None,
        })
    }

    pub fn icp(tx_hash: &str, timestamp_ms: i64) -> TransferRecord {
        TransferRecord::Icp(IcpTransfer {
            tx_hash: tx_hash.to_string(),
            source_chain: "a".to_string(),
            target_chain: "b".to_string(),
            status: TransactionStatus::Pending,
            timestamp: ms(timestamp_ms),
            target_tx_hash: None,
            completed_at: None,
            estimated_completion_time: None,
            error: None,
            token: Some("usdx".to_string()),
            amount: Some(Amount(10)),
            owner: None,
        })
    }

    /// Two-hop swap a -> b -> c with the given hop statuses
    pub fn swap(id: &str, created_ms: i64, hops: &[TransactionStatus]) -> TransferRecord {
        let chains = ["a", "b", "c"];
        let transactions: Vec<HopTransaction> = hops
            .iter()
            .enumerate()
            .map(|(i, status)| HopTransaction {
                chain: chains[i % chains.len()].to_string(),
                hash: format!("0x{}{}", id, i),
                status: *status,
            })
            .collect();
        TransferRecord::Swap(SwapTransaction {
            id: id.to_string(),
            from_chain: "a".to_string(),
            to_chain: "c".to_string(),
            from_asset: "usdx".to_string(),
            to_asset: "wbtc".to_string(),
            from_amount: Amount(1_000),
            to_amount: Amount(1),
            route: Route::new(vec![
                step("a", "b", "usdx", "usdx", 1),
                step("b", "c", "usdx", "wbtc", 1),
            ]),
            status: derive_swap_status(&transactions),
            transactions,
            created_at: ms(created_ms),
            updated_at: ms(created_ms),
            completed_at: None,
            error: None,
            owner: None,
        })
    }
}
