//! Correlating client over an envelope transport
//!
//! Responses are matched to requests by correlation id, never by arrival
//! order, so concurrent requests may resolve in any order.

use super::{into_result, MessageChannel, MessageType};
use crate::config::ChannelConfig;
use crate::error::{TransferError, TransferResult};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outbound request frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub correlation_id: Uuid,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub payload: Value,
}

/// Inbound response frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub correlation_id: Uuid,
    pub body: Value,
}

type PendingTable = DashMap<Uuid, oneshot::Sender<Value>>;

/// Forgets a pending correlation id when the request ends, however it ends.
/// A caller that drops `send` mid-flight would otherwise leak its entry.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    correlation_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.correlation_id);
    }
}

/// [`MessageChannel`] implementation over a pair of envelope queues
pub struct CorrelatedChannel {
    outbound: mpsc::Sender<RequestEnvelope>,
    pending: Arc<PendingTable>,
    request_timeout: Duration,
    dispatcher: JoinHandle<()>,
}

impl CorrelatedChannel {
    /// Wire the client to a transport.
    ///
    /// Spawns a dispatcher task that drains `inbound` and wakes the matching
    /// waiter. Must be called from within a tokio runtime.
    pub fn new(
        outbound: mpsc::Sender<RequestEnvelope>,
        inbound: mpsc::Receiver<ResponseEnvelope>,
        config: &ChannelConfig,
    ) -> Self {
        let pending: Arc<PendingTable> = Arc::new(DashMap::new());
        let dispatcher = tokio::spawn(dispatch(inbound, pending.clone()));

        Self {
            outbound,
            pending,
            request_timeout: config.request_timeout(),
            dispatcher,
        }
    }

    /// Create a client together with the remote ends of its queues
    pub fn with_queues(
        config: &ChannelConfig,
    ) -> (
        Self,
        mpsc::Receiver<RequestEnvelope>,
        mpsc::Sender<ResponseEnvelope>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(config.buffer_size);
        let (in_tx, in_rx) = mpsc::channel(config.buffer_size);
        (Self::new(out_tx, in_rx, config), out_rx, in_tx)
    }

    /// Number of requests still waiting for a response
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for CorrelatedChannel {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch(mut inbound: mpsc::Receiver<ResponseEnvelope>, pending: Arc<PendingTable>) {
    while let Some(response) = inbound.recv().await {
        match pending.remove(&response.correlation_id) {
            Some((_, waiter)) => {
                if waiter.send(response.body).is_err() {
                    debug!(
                        "Waiter for {} went away before its response arrived",
                        response.correlation_id
                    );
                }
            }
            None => {
                warn!(
                    "Dropping response with unknown correlation id {}",
                    response.correlation_id
                );
            }
        }
    }

    // Transport closed: dropping the senders fails every waiter with ChannelClosed
    pending.clear();
    debug!("Response stream closed");
}

#[async_trait]
impl MessageChannel for CorrelatedChannel {
    async fn send(&self, message_type: MessageType, payload: Value) -> TransferResult<Value> {
        if self.dispatcher.is_finished() {
            return Err(TransferError::ChannelClosed);
        }

        let correlation_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            correlation_id,
        };

        let envelope = RequestEnvelope {
            correlation_id,
            message_type,
            payload,
        };

        debug!("Sending {} ({})", message_type, correlation_id);

        if self.outbound.send(envelope).await.is_err() {
            return Err(TransferError::ChannelClosed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(body)) => into_result(message_type, body),
            Ok(Err(_)) => Err(TransferError::ChannelClosed),
            Err(_) => {
                warn!("{} ({}) timed out", message_type, correlation_id);
                Err(TransferError::Timeout {
                    operation: message_type.to_string(),
                })
            }
        }
    }
}
