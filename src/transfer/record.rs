//! Transfer records and status patches

use crate::catalog::{Amount, ChainId, ProviderId, TokenId};
use crate::composer::Route;
use crate::error::{TransferError, TransferResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status shared by every transfer kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Confirmed,
    Failed,
    Rejected,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Confirmed => "CONFIRMED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Rejected => "REJECTED",
        }
    }

    /// No further transitions are permitted out of a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Confirmed | TransactionStatus::Failed | TransactionStatus::Rejected
        )
    }

    fn rank(&self) -> u8 {
        match self {
            TransactionStatus::Pending => 0,
            TransactionStatus::Processing => 1,
            _ => 2,
        }
    }

    /// Whether moving from `self` to `next` is allowed
    pub fn can_become(&self, next: TransactionStatus) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "submitted" => Ok(TransactionStatus::Pending),
            "processing" | "in_progress" => Ok(TransactionStatus::Processing),
            "confirmed" | "completed" | "success" => Ok(TransactionStatus::Confirmed),
            "failed" | "error" => Ok(TransactionStatus::Failed),
            "rejected" => Ok(TransactionStatus::Rejected),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

impl TryFrom<String> for TransactionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransactionStatus> for String {
    fn from(status: TransactionStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Discriminant of a [`TransferRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Icp,
    Bridge,
    Swap,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferKind::Icp => "icp",
            TransferKind::Bridge => "bridge",
            TransferKind::Swap => "swap",
        };
        f.write_str(name)
    }
}

/// Direct inter-chain-protocol transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IcpTransfer {
    pub tx_hash: String,
    pub source_chain: ChainId,
    pub target_chain: ChainId,
    pub status: TransactionStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tx_hash: Option<String>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub estimated_completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Provider-mediated bridge transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeTransaction {
    pub id: String,
    pub provider: ProviderId,
    pub from_chain: ChainId,
    pub to_chain: ChainId,
    pub from_asset: TokenId,
    pub to_asset: TokenId,
    pub from_amount: Amount,
    pub to_amount: Amount,
    pub source_tx_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tx_hash: Option<String>,
    pub status: TransactionStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// One on-chain leg of a swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HopTransaction {
    pub chain: ChainId,
    pub hash: String,
    pub status: TransactionStatus,
}

/// Multi-hop cross-chain swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTransaction {
    pub id: String,
    pub from_chain: ChainId,
    pub to_chain: ChainId,
    pub from_asset: TokenId,
    pub to_asset: TokenId,
    pub from_amount: Amount,
    pub to_amount: Amount,
    pub route: Route,
    #[serde(default)]
    pub transactions: Vec<HopTransaction>,
    pub status: TransactionStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Overall swap status from its hops.
///
/// Any failed or rejected hop fails the swap; all hops confirmed confirms it;
/// partial progress is `Processing`.
pub fn derive_swap_status(hops: &[HopTransaction]) -> TransactionStatus {
    if hops.is_empty() {
        return TransactionStatus::Pending;
    }
    if hops.iter().any(|h| {
        matches!(
            h.status,
            TransactionStatus::Failed | TransactionStatus::Rejected
        )
    }) {
        return TransactionStatus::Failed;
    }
    if hops.iter().all(|h| h.status == TransactionStatus::Confirmed) {
        return TransactionStatus::Confirmed;
    }
    if hops.iter().any(|h| {
        matches!(
            h.status,
            TransactionStatus::Confirmed | TransactionStatus::Processing
        )
    }) {
        return TransactionStatus::Processing;
    }
    TransactionStatus::Pending
}

/// Partial update reported by the remote or the confirmation tracker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<HopTransaction>>,
}

impl StatusPatch {
    pub fn status(status: TransactionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TransactionStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn at(mut self, when: DateTime<Utc>) -> Self {
        self.updated_at = Some(when);
        self
    }
}

/// A tracked transfer of any kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransferRecord {
    Icp(IcpTransfer),
    Bridge(BridgeTransaction),
    Swap(SwapTransaction),
}

impl TransferRecord {
    /// Transfer id, or the transaction hash for ICP transfers
    pub fn id(&self) -> &str {
        match self {
            TransferRecord::Icp(t) => &t.tx_hash,
            TransferRecord::Bridge(b) => &b.id,
            TransferRecord::Swap(s) => &s.id,
        }
    }

    pub fn kind(&self) -> TransferKind {
        match self {
            TransferRecord::Icp(_) => TransferKind::Icp,
            TransferRecord::Bridge(_) => TransferKind::Bridge,
            TransferRecord::Swap(_) => TransferKind::Swap,
        }
    }

    pub fn status(&self) -> TransactionStatus {
        match self {
            TransferRecord::Icp(t) => t.status,
            TransferRecord::Bridge(b) => b.status,
            TransferRecord::Swap(s) => s.status,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// `createdAt` when the kind has one, else `timestamp`
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        match self {
            TransferRecord::Icp(t) => t.timestamp,
            TransferRecord::Bridge(b) => b.created_at,
            TransferRecord::Swap(s) => s.created_at,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        match self {
            TransferRecord::Icp(t) => t.owner.as_deref(),
            TransferRecord::Bridge(b) => b.owner.as_deref(),
            TransferRecord::Swap(s) => s.owner.as_deref(),
        }
    }

    pub fn set_owner_if_missing(&mut self, owner: &str) {
        let slot = match self {
            TransferRecord::Icp(t) => &mut t.owner,
            TransferRecord::Bridge(b) => &mut b.owner,
            TransferRecord::Swap(s) => &mut s.owner,
        };
        if slot.is_none() {
            *slot = Some(owner.to_string());
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            TransferRecord::Icp(t) => t.error.as_deref(),
            TransferRecord::Bridge(b) => b.error.as_deref(),
            TransferRecord::Swap(s) => s.error.as_deref(),
        }
    }

    /// Decode a record that carries no `kind` tag.
    ///
    /// `route` marks a swap; otherwise `sourceTxHash` marks a bridge
    /// transaction; anything else is an ICP transfer.
    pub fn from_untagged(value: Value) -> TransferResult<Self> {
        if let Some(kind) = value.get("kind").and_then(Value::as_str) {
            if matches!(kind, "icp" | "bridge" | "swap") {
                return Ok(serde_json::from_value(value)?);
            }
        }

        let record = if value.get("route").is_some() {
            TransferRecord::Swap(serde_json::from_value(value)?)
        } else if value.get("sourceTxHash").is_some() {
            TransferRecord::Bridge(serde_json::from_value(value)?)
        } else {
            TransferRecord::Icp(serde_json::from_value(value)?)
        };
        Ok(record)
    }

    /// Merge a status patch into the record.
    ///
    /// Returns whether anything changed. A patch that would move the status
    /// backwards, or out of a terminal status, is rejected untouched.
    pub fn apply_patch(&mut self, patch: &StatusPatch) -> TransferResult<bool> {
        let current = self.status();
        let next = self.target_status(patch);

        if !current.can_become(next) {
            return Err(TransferError::StateInconsistency {
                id: self.id().to_string(),
                from: current,
                to: next,
            });
        }

        let before = self.clone();
        match self {
            TransferRecord::Icp(t) => {
                t.status = next;
                merge_opt(&mut t.target_tx_hash, &patch.target_tx_hash);
                merge_opt(&mut t.completed_at, &patch.completed_at);
                merge_opt(&mut t.error, &patch.error);
            }
            TransferRecord::Bridge(b) => {
                b.status = next;
                merge_opt(&mut b.target_tx_hash, &patch.target_tx_hash);
                merge_opt(&mut b.completed_at, &patch.completed_at);
                merge_opt(&mut b.error, &patch.error);
                if let Some(at) = patch.updated_at {
                    b.updated_at = b.updated_at.max(at);
                }
            }
            TransferRecord::Swap(s) => {
                if let Some(hops) = &patch.transactions {
                    s.transactions = merge_hops(&s.transactions, hops);
                }
                s.status = next;
                merge_opt(&mut s.completed_at, &patch.completed_at);
                merge_opt(&mut s.error, &patch.error);
                if let Some(at) = patch.updated_at {
                    s.updated_at = s.updated_at.max(at);
                }
            }
        }

        Ok(*self != before)
    }

    /// Status the record would have after `patch`
    fn target_status(&self, patch: &StatusPatch) -> TransactionStatus {
        match self {
            TransferRecord::Swap(s) => match &patch.transactions {
                Some(hops) => {
                    let derived = derive_swap_status(&merge_hops(&s.transactions, hops));
                    if derived.is_terminal() {
                        return derived;
                    }
                    match patch.status {
                        // an explicit execution failure outranks hop progress
                        Some(explicit) if explicit.is_terminal() => explicit,
                        // hops that lag behind never pull the status backwards
                        explicit => [derived, explicit.unwrap_or(s.status), s.status]
                            .into_iter()
                            .max_by_key(TransactionStatus::rank)
                            .unwrap_or(derived),
                    }
                }
                None => patch.status.unwrap_or(s.status),
            },
            other => patch.status.unwrap_or_else(|| other.status()),
        }
    }
}

fn merge_opt<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *slot = Some(value.clone());
    }
}

/// Merge reported hops into known hops by (chain, hash); a terminal hop keeps its status
fn merge_hops(known: &[HopTransaction], reported: &[HopTransaction]) -> Vec<HopTransaction> {
    let mut merged = known.to_vec();
    for hop in reported {
        match merged
            .iter_mut()
            .find(|h| h.chain == hop.chain && h.hash == hop.hash)
        {
            Some(existing) => {
                if existing.status.can_become(hop.status) {
                    existing.status = hop.status;
                }
            }
            None => merged.push(hop.clone()),
        }
    }
    merged
}
