//! Transfer lifecycle manager
//!
//! Submits transfers to the remote, owns the record store, and reconciles
//! every later status report (remote refreshes, pushed updates, confirmation
//! events) through monotonic status patches.

use super::record::{
    BridgeTransaction, HopTransaction, IcpTransfer, StatusPatch, SwapTransaction,
    TransactionStatus, TransferRecord,
};
use super::request::{
    BridgeTransferRequest, ExecuteSwapResponse, IcpTransferRequest, InitiateBridgeResponse,
    InitiateIcpResponse, SwapRequest, TransferRequest,
};
use super::store::RecordStore;
use crate::channel::{self, MessageChannel, MessageType};
use crate::confirmation::{
    ConfirmationEvent, ConfirmationOutcome, ConfirmationTracker, TrackRequest, TrackingHandle,
};
use crate::error::{TransferError, TransferResult};

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::json;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of reconciling one status patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The record changed; carries the updated copy
    Applied(TransferRecord),
    /// Nothing new in the patch
    Unchanged,
    /// The patch would have regressed the record and was dropped
    Rejected,
}

pub struct TransferManager {
    channel: Arc<dyn MessageChannel>,
    store: Arc<RecordStore>,
    tracker: Option<Arc<ConfirmationTracker>>,
    auto_track: bool,
    refresh_errors: DashMap<String, String>,
}

impl TransferManager {
    pub fn new(channel: Arc<dyn MessageChannel>, store: Arc<RecordStore>) -> Self {
        Self {
            channel,
            store,
            tracker: None,
            auto_track: false,
            refresh_errors: DashMap::new(),
        }
    }

    /// Attach a confirmation tracker; with `auto_track` every successful
    /// submit starts tracking its on-chain transaction
    pub fn with_tracker(mut self, tracker: Arc<ConfirmationTracker>, auto_track: bool) -> Self {
        self.tracker = Some(tracker);
        self.auto_track = auto_track;
        self
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn tracker(&self) -> Option<&Arc<ConfirmationTracker>> {
        self.tracker.as_ref()
    }

    pub async fn get(&self, id: &str) -> Option<TransferRecord> {
        self.store.get(id).await
    }

    /// Submit any transfer kind
    pub async fn submit(&self, request: TransferRequest) -> TransferResult<TransferRecord> {
        debug!("Submitting {} transfer", request.kind());
        match request {
            TransferRequest::Icp(r) => self.submit_icp(r).await,
            TransferRequest::Bridge(r) => self.submit_bridge(r).await,
            TransferRequest::Swap(r) => self.execute_swap(r).await,
        }
    }

    pub async fn submit_bridge(
        &self,
        request: BridgeTransferRequest,
    ) -> TransferResult<TransferRecord> {
        request.validate()?;

        let ack: InitiateBridgeResponse = channel::request(
            self.channel.as_ref(),
            MessageType::InitiateBridgeTransfer,
            &request,
        )
        .await?;

        let now = Utc::now();
        let record = TransferRecord::Bridge(BridgeTransaction {
            id: ack.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            provider: request.provider,
            from_chain: request.source_chain,
            to_chain: request.destination_chain,
            from_asset: request.token.clone(),
            to_asset: request.token,
            from_amount: request.amount,
            to_amount: ack.to_amount.unwrap_or(request.amount),
            source_tx_hash: ack.source_tx_hash,
            target_tx_hash: None,
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            owner: request.owner,
        });

        let initial = ack.status.map(StatusPatch::status);
        self.accept(record, initial).await
    }

    pub async fn submit_icp(&self, request: IcpTransferRequest) -> TransferResult<TransferRecord> {
        request.validate()?;

        let ack: InitiateIcpResponse = channel::request(
            self.channel.as_ref(),
            MessageType::InitiateIcpTransfer,
            &request,
        )
        .await?;

        let record = TransferRecord::Icp(IcpTransfer {
            tx_hash: ack.tx_hash,
            source_chain: request.source_chain,
            target_chain: request.target_chain,
            status: TransactionStatus::Pending,
            timestamp: Utc::now(),
            target_tx_hash: None,
            completed_at: None,
            estimated_completion_time: ack.estimated_completion_time,
            error: None,
            token: Some(request.token),
            amount: Some(request.amount),
            owner: request.owner,
        });

        let initial = ack.status.map(StatusPatch::status);
        self.accept(record, initial).await
    }

    /// Execute a composed route as a multi-hop swap
    pub async fn execute_swap(&self, request: SwapRequest) -> TransferResult<TransferRecord> {
        request.validate()?;

        let ack: ExecuteSwapResponse =
            channel::request(self.channel.as_ref(), MessageType::ExecuteSwap, &request).await?;

        let (first, last) = match (request.route.first(), request.route.last()) {
            (Some(f), Some(l)) => (f.clone(), l.clone()),
            _ => {
                return Err(TransferError::RouteComposition(
                    "route has no steps".to_string(),
                ))
            }
        };

        let now = Utc::now();
        let record = TransferRecord::Swap(SwapTransaction {
            id: ack.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            from_chain: first.from_chain,
            to_chain: last.to_chain,
            from_asset: first.from_asset,
            to_asset: last.to_asset,
            from_amount: first.from_amount,
            to_amount: last.to_amount,
            route: request.route,
            transactions: Vec::new(),
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            owner: request.owner,
        });

        let initial = if ack.transactions.is_empty() && ack.status.is_none() {
            None
        } else {
            Some(StatusPatch {
                status: ack.status,
                transactions: (!ack.transactions.is_empty()).then_some(ack.transactions),
                ..Default::default()
            })
        };
        self.accept(record, initial).await
    }

    /// Store a freshly acknowledged record, fold in whatever status the
    /// acknowledgement carried, and start tracking
    async fn accept(
        &self,
        record: TransferRecord,
        initial: Option<StatusPatch>,
    ) -> TransferResult<TransferRecord> {
        let id = record.id().to_string();
        let kind = record.kind();

        self.store.insert(record).await?;
        crate::metrics::record_transfer_submitted(kind);
        info!("Submitted {} transfer {}", kind, id);

        if let Some(patch) = initial {
            self.on_remote_update(&id, patch).await?;
        }

        let record = self
            .store
            .get(&id)
            .await
            .ok_or_else(|| TransferError::NotFound { id: id.clone() })?;

        if self.auto_track {
            for handle in self.track_confirmations(&record) {
                handle.detach();
            }
        }

        Ok(record)
    }

    /// Merge a status report into a stored record.
    ///
    /// Idempotent. Regressions are logged and dropped rather than returned
    /// as errors.
    pub async fn on_remote_update(
        &self,
        id: &str,
        patch: StatusPatch,
    ) -> TransferResult<PatchOutcome> {
        let previous = self.store.get(id).await.map(|r| r.status());

        match self.store.apply_patch(id, &patch).await {
            Ok((record, true)) => {
                if previous != Some(record.status()) {
                    info!(
                        "{} {} is now {}",
                        record.kind(),
                        record.id(),
                        record.status()
                    );
                    crate::metrics::record_status_transition(record.kind(), record.status());
                }
                Ok(PatchOutcome::Applied(record))
            }
            Ok((_, false)) => {
                debug!("Patch for {} changed nothing", id);
                Ok(PatchOutcome::Unchanged)
            }
            Err(e @ TransferError::StateInconsistency { .. }) => {
                warn!("{}", e);
                crate::metrics::record_patch_rejected();
                Ok(PatchOutcome::Rejected)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch a record's current status from the remote and merge it.
    ///
    /// On failure the stored record is left as it was and the error text is
    /// kept for [`last_refresh_error`](Self::last_refresh_error).
    pub async fn refresh_status(&self, id: &str) -> TransferResult<TransferRecord> {
        let record = self
            .store
            .get(id)
            .await
            .ok_or_else(|| TransferError::NotFound { id: id.to_string() })?;

        let (message_type, payload) = match &record {
            TransferRecord::Icp(t) => (
                MessageType::GetIcpTransferStatus,
                json!({ "txHash": t.tx_hash, "sourceChain": t.source_chain }),
            ),
            TransferRecord::Bridge(b) => (
                MessageType::GetBridgeTransactionStatus,
                json!({ "id": b.id, "provider": b.provider }),
            ),
            TransferRecord::Swap(s) => (MessageType::GetSwapStatus, json!({ "id": s.id })),
        };

        let patch: StatusPatch =
            match channel::request(self.channel.as_ref(), message_type, &payload).await {
                Ok(patch) => patch,
                Err(e) => {
                    warn!("Status refresh for {} failed: {}", id, e);
                    self.refresh_errors.insert(id.to_string(), e.to_string());
                    return Err(e);
                }
            };

        self.refresh_errors.remove(id);
        self.on_remote_update(id, patch).await?;
        self.store
            .get(id)
            .await
            .ok_or_else(|| TransferError::NotFound { id: id.to_string() })
    }

    /// Refresh every non-terminal record concurrently
    pub async fn refresh_in_flight(&self) -> Vec<(String, TransferResult<TransferRecord>)> {
        let ids: Vec<String> = self
            .store
            .in_flight()
            .await
            .iter()
            .map(|r| r.id().to_string())
            .collect();

        debug!("Refreshing {} in-flight transfers", ids.len());
        let results = join_all(ids.iter().map(|id| self.refresh_status(id))).await;
        ids.into_iter().zip(results).collect()
    }

    /// Error text of the latest failed refresh, cleared by the next success
    pub fn last_refresh_error(&self, id: &str) -> Option<String> {
        self.refresh_errors.get(id).map(|e| e.value().clone())
    }

    /// Start confirmation tracking for a record's unsettled transactions.
    ///
    /// Dropping the returned handles cancels the polling.
    pub fn track_confirmations(&self, record: &TransferRecord) -> Vec<TrackingHandle> {
        let Some(tracker) = &self.tracker else {
            return Vec::new();
        };
        if record.is_terminal() {
            return Vec::new();
        }

        let id = record.id();
        let requests = match record {
            TransferRecord::Icp(t) => vec![TrackRequest::new(id, &t.source_chain, &t.tx_hash)],
            TransferRecord::Bridge(b) => {
                let mut requests = vec![TrackRequest::new(id, &b.from_chain, &b.source_tx_hash)];
                if let Some(target) = &b.target_tx_hash {
                    requests.push(TrackRequest::new(id, &b.to_chain, target));
                }
                requests
            }
            TransferRecord::Swap(s) => s
                .transactions
                .iter()
                .filter(|hop| !hop.status.is_terminal())
                .map(|hop| TrackRequest::new(id, &hop.chain, &hop.hash))
                .collect(),
        };

        requests.into_iter().map(|r| tracker.track(r)).collect()
    }

    /// Fold a terminal confirmation event into its record.
    ///
    /// Progress and time-outs never touch the record.
    pub async fn apply_confirmation(
        &self,
        event: &ConfirmationEvent,
    ) -> TransferResult<PatchOutcome> {
        let record = self
            .store
            .get(&event.record_id)
            .await
            .ok_or_else(|| TransferError::NotFound {
                id: event.record_id.clone(),
            })?;

        let now = Utc::now();
        let hop = |status| HopTransaction {
            chain: event.chain.clone(),
            hash: event.tx_hash.clone(),
            status,
        };

        let patch = match (&record, &event.outcome) {
            (_, ConfirmationOutcome::Progress { .. }) | (_, ConfirmationOutcome::TimedOut { .. }) => {
                return Ok(PatchOutcome::Unchanged)
            }
            (TransferRecord::Swap(_), ConfirmationOutcome::Final { .. }) => {
                let mut patch = StatusPatch {
                    transactions: Some(vec![hop(TransactionStatus::Confirmed)]),
                    ..Default::default()
                }
                .at(now);
                let mut preview = record.clone();
                if preview.apply_patch(&patch).is_ok()
                    && preview.status() == TransactionStatus::Confirmed
                {
                    patch.completed_at = Some(now);
                }
                patch
            }
            (TransferRecord::Swap(_), ConfirmationOutcome::Failed { reason }) => StatusPatch {
                transactions: Some(vec![hop(TransactionStatus::Failed)]),
                error: Some(reason.clone()),
                ..Default::default()
            }
            .at(now),
            (TransferRecord::Bridge(b), ConfirmationOutcome::Final { .. })
                if b.target_tx_hash.as_deref() != Some(event.tx_hash.as_str()) =>
            {
                // source leg settled; the bridge itself is still moving funds
                if record.is_terminal() {
                    return Ok(PatchOutcome::Unchanged);
                }
                StatusPatch::status(TransactionStatus::Processing).at(now)
            }
            (_, ConfirmationOutcome::Final { .. }) => StatusPatch {
                status: Some(TransactionStatus::Confirmed),
                completed_at: Some(now),
                ..Default::default()
            }
            .at(now),
            (_, ConfirmationOutcome::Failed { reason }) => StatusPatch::failed(reason).at(now),
        };

        self.on_remote_update(&event.record_id, patch).await
    }

    /// Apply tracker events to records in the background until the tracker
    /// or this manager goes away
    pub fn spawn_confirmation_sync(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut events = self.tracker.as_ref()?.subscribe();
        let manager: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Confirmation sync lagged, skipped {} events", missed);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if !event.outcome.is_terminal() {
                    continue;
                }

                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if let Err(e) = manager.apply_confirmation(&event).await {
                    error!(
                        "Failed to apply confirmation for {}: {}",
                        event.record_id, e
                    );
                }
            }
            debug!("Confirmation sync stopped");
        }))
    }
}
