//! Chain observation seam for the confirmation tracker

use crate::channel::{self, MessageChannel, MessageType};
use crate::error::TransferResult;
use crate::transfer::TransactionStatus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What one poll saw for a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Included with this many confirmations
    Confirmations(u64),
    /// Reverted, dropped or otherwise failed on chain
    Failed(String),
    /// Not visible yet
    NotFound,
}

/// Source of confirmation depth for on-chain transactions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainObserver: Send + Sync {
    async fn observe(&self, chain: &str, tx_hash: &str) -> TransferResult<Observation>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmationQuery<'a> {
    chain: &'a str,
    tx_hash: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmationReport {
    #[serde(default = "default_found")]
    found: bool,
    #[serde(default)]
    confirmations: u64,
    #[serde(default)]
    status: Option<TransactionStatus>,
    #[serde(default)]
    reason: Option<String>,
}

fn default_found() -> bool {
    true
}

/// Observer backed by the remote's `GET_TRANSACTION_CONFIRMATIONS`
pub struct ChannelObserver {
    channel: Arc<dyn MessageChannel>,
}

impl ChannelObserver {
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChainObserver for ChannelObserver {
    async fn observe(&self, chain: &str, tx_hash: &str) -> TransferResult<Observation> {
        let report: ConfirmationReport = channel::request(
            self.channel.as_ref(),
            MessageType::GetTransactionConfirmations,
            &ConfirmationQuery { chain, tx_hash },
        )
        .await?;

        let observation = match report.status {
            Some(TransactionStatus::Failed) | Some(TransactionStatus::Rejected) => {
                Observation::Failed(
                    report
                        .reason
                        .unwrap_or_else(|| "transaction failed on chain".to_string()),
                )
            }
            _ if !report.found => Observation::NotFound,
            _ => Observation::Confirmations(report.confirmations),
        };
        Ok(observation)
    }
}
