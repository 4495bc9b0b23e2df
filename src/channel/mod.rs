//! Message channel to the remote execution environment
//!
//! Every operation of the core maps to exactly one message type. Requests are
//! fire-and-await with no implicit retry; `{error}` responses become
//! [`TransferError::Remote`] carrying the original message.

mod client;

pub use client::{CorrelatedChannel, RequestEnvelope, ResponseEnvelope};

use crate::error::{TransferError, TransferResult};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Message types understood by the remote execution environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    GetBridgeProviders,
    GetBridgeQuote,
    InitiateBridgeTransfer,
    GetBridgeTransactionStatus,
    InitiateIcpTransfer,
    GetIcpTransferStatus,
    ExecuteSwap,
    GetSwapStatus,
    FindRoutes,
    GetCrosschainHistory,
    GetTransactionConfirmations,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::GetBridgeProviders => "GET_BRIDGE_PROVIDERS",
            MessageType::GetBridgeQuote => "GET_BRIDGE_QUOTE",
            MessageType::InitiateBridgeTransfer => "INITIATE_BRIDGE_TRANSFER",
            MessageType::GetBridgeTransactionStatus => "GET_BRIDGE_TRANSACTION_STATUS",
            MessageType::InitiateIcpTransfer => "INITIATE_ICP_TRANSFER",
            MessageType::GetIcpTransferStatus => "GET_ICP_TRANSFER_STATUS",
            MessageType::ExecuteSwap => "EXECUTE_SWAP",
            MessageType::GetSwapStatus => "GET_SWAP_STATUS",
            MessageType::FindRoutes => "FIND_ROUTES",
            MessageType::GetCrosschainHistory => "GET_CROSSCHAIN_HISTORY",
            MessageType::GetTransactionConfirmations => "GET_TRANSACTION_CONFIRMATIONS",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request/response primitive to the remote execution environment
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Send a message and wait for its correlated response.
    ///
    /// Returns the success payload, or [`TransferError::Remote`] when the
    /// remote answered with `{error}`.
    async fn send(&self, message_type: MessageType, payload: Value) -> TransferResult<Value>;
}

/// Send a typed request and decode the typed response
pub async fn request<Req, Resp>(
    channel: &dyn MessageChannel,
    message_type: MessageType,
    payload: &Req,
) -> TransferResult<Resp>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let payload = serde_json::to_value(payload)?;
    let body = channel.send(message_type, payload).await?;

    serde_json::from_value(body).map_err(|e| TransferError::Remote {
        message_type,
        message: format!("malformed response: {}", e),
    })
}

/// Convert a raw response body into a success payload or a remote error.
///
/// Only a body whose sole field is a non-null `error` is a failure envelope.
/// Payloads that report a failed transfer alongside other fields, such as
/// `{"status": "failed", "error": "reverted"}`, are successful replies.
pub fn into_result(message_type: MessageType, body: Value) -> TransferResult<Value> {
    let error = match body.as_object() {
        Some(fields) if fields.len() == 1 => fields.get("error"),
        _ => None,
    };

    if let Some(error) = error {
        let message = match error {
            Value::String(s) => s.clone(),
            Value::Null => return Ok(body),
            other => other.to_string(),
        };
        crate::metrics::record_remote_error(message_type);
        return Err(TransferError::Remote {
            message_type,
            message,
        });
    }

    Ok(body)
}
