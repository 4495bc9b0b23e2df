//! Submit requests and the remote's acknowledgements

use crate::catalog::{Amount, ChainId, ProviderId, TokenId};
use crate::composer::Route;
use crate::error::{TransferError, TransferResult};
use crate::selector::SelectionField;

use super::record::{HopTransaction, TransactionStatus, TransferKind};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Validated bridge transfer, ready for `INITIATE_BRIDGE_TRANSFER`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeTransferRequest {
    pub provider: ProviderId,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub token: TokenId,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl BridgeTransferRequest {
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Structural checks only; balance and catalog legality belong to the selector
    pub fn validate(&self) -> TransferResult<()> {
        check_chains(&self.source_chain, &self.destination_chain)?;
        non_empty(&self.token, SelectionField::Token)?;
        non_empty(&self.provider, SelectionField::Provider)?;
        positive(self.amount)
    }
}

/// Direct inter-chain-protocol transfer, sent as `INITIATE_ICP_TRANSFER`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IcpTransferRequest {
    pub source_chain: ChainId,
    pub target_chain: ChainId,
    pub token: TokenId,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl IcpTransferRequest {
    pub fn validate(&self) -> TransferResult<()> {
        check_chains(&self.source_chain, &self.target_chain)?;
        non_empty(&self.token, SelectionField::Token)?;
        positive(self.amount)
    }
}

/// Execute a previously composed route, sent as `EXECUTE_SWAP`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub route: Route,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl SwapRequest {
    pub fn new(route: Route) -> Self {
        Self {
            route,
            recipient: None,
            owner: None,
        }
    }

    pub fn validate(&self) -> TransferResult<()> {
        self.route
            .check_continuity()
            .map_err(TransferError::RouteComposition)?;
        match self.route.first() {
            Some(step) => positive(step.from_amount),
            None => Err(TransferError::RouteComposition(
                "route has no steps".to_string(),
            )),
        }
    }
}

/// Any submittable transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferRequest {
    Icp(IcpTransferRequest),
    Bridge(BridgeTransferRequest),
    Swap(SwapRequest),
}

impl TransferRequest {
    pub fn kind(&self) -> TransferKind {
        match self {
            TransferRequest::Icp(_) => TransferKind::Icp,
            TransferRequest::Bridge(_) => TransferKind::Bridge,
            TransferRequest::Swap(_) => TransferKind::Swap,
        }
    }

    pub fn validate(&self) -> TransferResult<()> {
        match self {
            TransferRequest::Icp(r) => r.validate(),
            TransferRequest::Bridge(r) => r.validate(),
            TransferRequest::Swap(r) => r.validate(),
        }
    }
}

impl From<IcpTransferRequest> for TransferRequest {
    fn from(request: IcpTransferRequest) -> Self {
        TransferRequest::Icp(request)
    }
}

impl From<BridgeTransferRequest> for TransferRequest {
    fn from(request: BridgeTransferRequest) -> Self {
        TransferRequest::Bridge(request)
    }
}

impl From<SwapRequest> for TransferRequest {
    fn from(request: SwapRequest) -> Self {
        TransferRequest::Swap(request)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitiateBridgeResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub source_tx_hash: String,
    #[serde(default)]
    pub to_amount: Option<Amount>,
    #[serde(default)]
    pub status: Option<TransactionStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitiateIcpResponse {
    pub tx_hash: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub estimated_completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<TransactionStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExecuteSwapResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub transactions: Vec<HopTransaction>,
    #[serde(default)]
    pub status: Option<TransactionStatus>,
}

fn non_empty(value: &str, field: SelectionField) -> TransferResult<()> {
    if value.trim().is_empty() {
        return Err(TransferError::validation(field, "is required"));
    }
    Ok(())
}

fn check_chains(source: &str, destination: &str) -> TransferResult<()> {
    non_empty(source, SelectionField::SourceChain)?;
    non_empty(destination, SelectionField::DestinationChain)?;
    if source == destination {
        return Err(TransferError::validation(
            SelectionField::DestinationChain,
            "must differ from the source chain",
        ));
    }
    Ok(())
}

fn positive(amount: Amount) -> TransferResult<()> {
    if amount.is_zero() {
        return Err(TransferError::validation(
            SelectionField::Amount,
            "must be greater than zero",
        ));
    }
    Ok(())
}
