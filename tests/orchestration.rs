//! End-to-end flows over in-memory remotes

use async_trait::async_trait;
use crosschain_orchestrator::catalog::{Amount, RouteCatalog};
use crosschain_orchestrator::channel::{
    CorrelatedChannel, MessageChannel, MessageType, RequestEnvelope, ResponseEnvelope,
};
use crosschain_orchestrator::composer::{Route, RouteComposer, RouteParams};
use crosschain_orchestrator::config::{ChannelConfig, ConfirmationConfig, Settings};
use crosschain_orchestrator::confirmation::{ChannelObserver, ConfirmationTracker};
use crosschain_orchestrator::history::{HistoryAggregator, HistoryFilter, HistoryKind};
use crosschain_orchestrator::selector::{RouteSelector, SelectionField};
use crosschain_orchestrator::transfer::{
    BridgeTransferRequest, RecordStore, SwapRequest, TransactionStatus, TransferManager,
};
use crosschain_orchestrator::{TransferError, TransferResult};

use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const CATALOG: &str = r#"
[confirmation]
threshold = 3
poll_interval_ms = 10

[[catalog.chains]]
id = "a"
name = "Chain A"
native_symbol = "A"

[[catalog.chains]]
id = "b"
name = "Chain B"
native_symbol = "B"

[[catalog.chains]]
id = "c"
name = "Chain C"
native_symbol = "C"

[[catalog.tokens]]
id = "usdx"
symbol = "USDX"
decimals = 6
networks = ["a", "b"]
balance_by_chain = { a = "5000000" }

[[catalog.providers]]
id = "p1"
name = "Provider One"

[[catalog.providers.supported_routes]]
source_chain = "a"
destination_chain = "b"
tokens = ["usdx"]

[[catalog.providers]]
id = "p2"
name = "Provider Two"

[[catalog.providers.supported_routes]]
source_chain = "a"
destination_chain = "c"
tokens = ["usdx"]
"#;

/// Replies from per-type queues and records everything it was sent
#[derive(Default)]
struct ScriptedChannel {
    replies: Mutex<HashMap<MessageType, VecDeque<Result<Value, String>>>>,
    sent: Mutex<Vec<(MessageType, Value)>>,
}

impl ScriptedChannel {
    fn reply(self, message_type: MessageType, body: Value) -> Self {
        self.push(message_type, Ok(body))
    }

    fn fail(self, message_type: MessageType, message: &str) -> Self {
        self.push(message_type, Err(message.to_string()))
    }

    fn push(self, message_type: MessageType, reply: Result<Value, String>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(message_type)
            .or_default()
            .push_back(reply);
        self
    }

    fn sent(&self) -> Vec<MessageType> {
        self.sent.lock().unwrap().iter().map(|(mt, _)| *mt).collect()
    }
}

#[async_trait]
impl MessageChannel for ScriptedChannel {
    async fn send(&self, message_type: MessageType, payload: Value) -> TransferResult<Value> {
        self.sent.lock().unwrap().push((message_type, payload));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&message_type)
            .and_then(|queue| queue.pop_front());

        match reply {
            Some(Ok(body)) => Ok(body),
            Some(Err(message)) => Err(TransferError::Remote {
                message_type,
                message,
            }),
            None => Err(TransferError::Remote {
                message_type,
                message: "no scripted reply".to_string(),
            }),
        }
    }
}

fn settings() -> Settings {
    Settings::from_toml_str(CATALOG).unwrap()
}

#[test]
fn default_config_file_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let settings = Settings::load_from(&path).unwrap();
    let catalog = RouteCatalog::from_config(&settings.catalog);

    let selector = RouteSelector::with_source(Arc::new(catalog), "ethereum");
    let selection = selector.selection();
    assert_eq!(selection.destination_chain.as_deref(), Some("polygon"));
    assert_eq!(selection.token.as_deref(), Some("usdc"));
    assert_eq!(selection.provider.as_deref(), Some("stargate"));
}

#[tokio::test]
async fn over_balance_amount_never_reaches_the_remote() {
    let settings = settings();
    let catalog = Arc::new(RouteCatalog::from_config(&settings.catalog));
    let channel = Arc::new(ScriptedChannel::default());
    let manager = TransferManager::new(channel.clone(), Arc::new(RecordStore::new()));

    let mut selector = RouteSelector::new(catalog);
    selector.set_source("a");
    selector.set_destination("b");
    selector.set_token("usdx");
    assert_eq!(selector.selection().provider.as_deref(), Some("p1"));

    let result = match selector.validate("5.000001") {
        Ok(request) => manager.submit_bridge(request).await,
        Err(e) => Err(e),
    };

    assert_eq!(result.unwrap_err().field(), Some(SelectionField::Amount));
    assert!(channel.sent().is_empty());
    assert!(manager.store().is_empty().await);
}

#[tokio::test]
async fn swap_with_failed_hop_is_failed() {
    let channel = Arc::new(
        ScriptedChannel::default()
            .reply(MessageType::ExecuteSwap, json!({"id": "sw-1"}))
            .reply(
                MessageType::GetSwapStatus,
                json!({"transactions": [
                    {"chain": "a", "hash": "0x1", "status": "CONFIRMED"},
                    {"chain": "b", "hash": "0x2", "status": "FAILED"}
                ]}),
            ),
    );
    let manager = TransferManager::new(channel.clone(), Arc::new(RecordStore::new()));

    let route: Route = serde_json::from_value(json!({"path": [
        {"type": "bridge", "provider": "p1", "fromChain": "a", "toChain": "b",
         "fromAsset": "usdx", "toAsset": "usdx", "fromAmount": "100", "toAmount": "99"},
        {"type": "swap", "fromChain": "b", "toChain": "b", "fromAsset": "usdx",
         "toAsset": "wbtc", "fromAmount": "99", "toAmount": "1"}
    ]}))
    .unwrap();

    manager.execute_swap(SwapRequest::new(route)).await.unwrap();
    let record = manager.refresh_status("sw-1").await.unwrap();

    assert_eq!(record.status(), TransactionStatus::Failed);
    assert_eq!(
        channel.sent(),
        vec![MessageType::ExecuteSwap, MessageType::GetSwapStatus]
    );
}

#[tokio::test]
async fn composed_routes_are_continuous_or_rejected() {
    let channel = Arc::new(
        ScriptedChannel::default()
            .reply(
                MessageType::FindRoutes,
                json!({"routes": [{"path": [
                    {"type": "bridge", "fromChain": "a", "toChain": "b", "fromAsset": "usdx",
                     "toAsset": "usdx", "fromAmount": "100", "toAmount": "99"},
                    {"type": "swap", "fromChain": "c", "toChain": "c", "fromAsset": "usdx",
                     "toAsset": "wbtc", "fromAmount": "99", "toAmount": "1"}
                ]}]}),
            )
            .fail(MessageType::FindRoutes, "quote service unavailable"),
    );
    let composer = RouteComposer::new(channel, settings().routing);
    let params = RouteParams {
        from_chain: "a".into(),
        to_chain: "c".into(),
        from_token: "usdx".into(),
        to_token: "wbtc".into(),
        amount: Amount(100),
    };

    let err = composer.compose_routes(&params).await.unwrap_err();
    assert!(matches!(err, TransferError::RouteComposition(_)));
    assert!(err.is_user_visible());

    let err = composer.compose_routes(&params).await.unwrap_err();
    assert!(err.to_string().contains("quote service unavailable"));
}

#[tokio::test]
async fn history_merges_partitions_newest_first() {
    let channel = Arc::new(ScriptedChannel::default().reply(
        MessageType::GetCrosschainHistory,
        json!({
            "icpTransfers": [
                {"txHash": "0xicp", "sourceChain": "a", "targetChain": "b",
                 "status": "CONFIRMED", "timestamp": 100}
            ],
            "bridgeTransactions": [
                {"id": "br", "provider": "p1", "fromChain": "a", "toChain": "b",
                 "fromAsset": "usdx", "toAsset": "usdx", "fromAmount": "1", "toAmount": "1",
                 "sourceTxHash": "0xbr", "status": "PENDING", "createdAt": 300, "updatedAt": 300}
            ],
            "swapTransactions": [
                {"id": "sw", "fromChain": "a", "toChain": "b", "fromAsset": "usdx",
                 "toAsset": "usdx", "fromAmount": "1", "toAmount": "1",
                 "route": {"path": [{"type": "bridge", "fromChain": "a", "toChain": "b",
                    "fromAsset": "usdx", "toAsset": "usdx", "fromAmount": "1", "toAmount": "1"}]},
                 "status": "PROCESSING", "createdAt": 200, "updatedAt": 200}
            ]
        }),
    ));
    let aggregator =
        HistoryAggregator::new(channel, Arc::new(RecordStore::new()), settings().history);

    let history = aggregator
        .get_history(&HistoryFilter::all().address("0xme").limit(2))
        .await
        .unwrap();
    let ids: Vec<_> = history.iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec!["br", "sw"]);

    // second query is served from the store after the remote has nothing left
    let icp_only = aggregator
        .get_history(&HistoryFilter::all().address("0xme").kind(HistoryKind::Icp))
        .await
        .unwrap();
    assert_eq!(icp_only.len(), 1);
    assert_eq!(icp_only[0].id(), "0xicp");
}

/// Minimal remote: acknowledges a bridge, reports growing confirmation
/// depth, then reports the bridge complete
async fn fake_remote(
    mut requests: mpsc::Receiver<RequestEnvelope>,
    responses: mpsc::Sender<ResponseEnvelope>,
) {
    let mut depth = 0u64;
    while let Some(request) = requests.recv().await {
        let body = match request.message_type {
            MessageType::InitiateBridgeTransfer => {
                json!({"id": "br-1", "sourceTxHash": "0xsrc", "toAmount": "990000"})
            }
            MessageType::GetTransactionConfirmations => {
                depth += 1;
                json!({"confirmations": depth})
            }
            MessageType::GetBridgeTransactionStatus => {
                json!({"status": "completed", "targetTxHash": "0xdst", "completedAt": 1_700_000_000_000i64})
            }
            MessageType::GetCrosschainHistory => json!({}),
            other => json!({"error": format!("unsupported {}", other)}),
        };
        let response = ResponseEnvelope {
            correlation_id: request.correlation_id,
            body,
        };
        if responses.send(response).await.is_err() {
            break;
        }
    }
}

#[tokio::test]
async fn bridge_transfer_end_to_end() {
    let settings = settings();
    let catalog = Arc::new(RouteCatalog::from_config(&settings.catalog));

    let (client, requests, responses) = CorrelatedChannel::with_queues(&ChannelConfig::default());
    tokio::spawn(fake_remote(requests, responses));
    let channel: Arc<dyn MessageChannel> = Arc::new(client);

    let store = Arc::new(RecordStore::new());
    let tracker = Arc::new(ConfirmationTracker::new(
        Arc::new(ChannelObserver::new(channel.clone())),
        ConfirmationConfig {
            threshold: 3,
            poll_interval_ms: 10,
            max_polls: Some(100),
            auto_track: true,
        },
    ));
    let manager = Arc::new(
        TransferManager::new(channel.clone(), store.clone()).with_tracker(tracker, true),
    );
    let _sync = manager.spawn_confirmation_sync();

    let selector = RouteSelector::with_source(catalog, "a");
    let request = selector.validate("1").unwrap().with_owner("0xme");
    assert_eq!(request.amount, Amount(1_000_000));

    let record = manager.submit_bridge(request).await.unwrap();
    assert_eq!(record.id(), "br-1");
    assert_eq!(record.status(), TransactionStatus::Pending);

    // source leg reaches the threshold and the bridge moves to processing
    let mut status = record.status();
    for _ in 0..200 {
        status = manager.get("br-1").await.unwrap().status();
        if status != TransactionStatus::Pending {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, TransactionStatus::Processing);

    let refreshed = manager.refresh_status("br-1").await.unwrap();
    assert_eq!(refreshed.status(), TransactionStatus::Confirmed);

    let aggregator = HistoryAggregator::new(channel, store, settings.history);
    let history = aggregator
        .get_history(&HistoryFilter::all().address("0xme"))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status(), TransactionStatus::Confirmed);
}

#[tokio::test]
async fn failed_bridge_report_marks_record_failed() {
    let (client, mut requests, responses) =
        CorrelatedChannel::with_queues(&ChannelConfig::default());
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let body = match request.message_type {
                MessageType::InitiateBridgeTransfer => {
                    json!({"id": "br-1", "sourceTxHash": "0xsrc"})
                }
                MessageType::GetBridgeTransactionStatus => {
                    json!({"status": "failed", "error": "reverted on target"})
                }
                other => json!({"error": format!("unsupported {}", other)}),
            };
            let response = ResponseEnvelope {
                correlation_id: request.correlation_id,
                body,
            };
            if responses.send(response).await.is_err() {
                break;
            }
        }
    });

    let manager = TransferManager::new(Arc::new(client), Arc::new(RecordStore::new()));
    manager
        .submit_bridge(BridgeTransferRequest {
            provider: "p1".into(),
            source_chain: "a".into(),
            destination_chain: "b".into(),
            token: "usdx".into(),
            amount: Amount(1_000_000),
            recipient: None,
            owner: None,
        })
        .await
        .unwrap();

    let record = manager.refresh_status("br-1").await.unwrap();
    assert_eq!(record.status(), TransactionStatus::Failed);
    assert_eq!(record.error(), Some("reverted on target"));
    assert_eq!(manager.last_refresh_error("br-1"), None);
}
