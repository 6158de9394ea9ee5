//! Reconciliation Integration Tests
//!
//! Exercises the reconciler and the manager facade against recording
//! transport doubles: reference counting across contexts, idempotence,
//! the no-gap property, teardown, and self-healing after proxy failures.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use quote_stream_manager::{
    BrokerControl, BrokerEvent, ManagerOptions, ProxyError, ProxyTransport, QuoteStreamManager,
    Reconciler, TopicHandle,
};

// =============================================================================
// Recording doubles
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProxyCall {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    ClearAll,
}

/// Proxy double that mirrors the external proxy's subscription set.
#[derive(Default)]
struct RecordingProxy {
    calls: Mutex<Vec<ProxyCall>>,
    remote: Mutex<HashSet<String>>,
    fail_subscribe: AtomicBool,
    fail_subscriptions: AtomicBool,
}

impl RecordingProxy {
    fn calls(&self) -> Vec<ProxyCall> {
        self.calls.lock().clone()
    }

    fn remote(&self) -> HashSet<String> {
        self.remote.lock().clone()
    }
}

#[async_trait]
impl ProxyTransport for RecordingProxy {
    async fn subscribe(&self, codes: &[String]) -> Result<(), ProxyError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(ProxyError::Request("proxy unreachable".to_string()));
        }
        self.calls.lock().push(ProxyCall::Subscribe(codes.to_vec()));
        self.remote.lock().extend(codes.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&self, codes: &[String]) -> Result<(), ProxyError> {
        self.calls
            .lock()
            .push(ProxyCall::Unsubscribe(codes.to_vec()));
        let mut remote = self.remote.lock();
        for code in codes {
            remote.remove(code);
        }
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), ProxyError> {
        self.calls.lock().push(ProxyCall::ClearAll);
        self.remote.lock().clear();
        Ok(())
    }

    async fn subscriptions(&self) -> Result<Vec<String>, ProxyError> {
        if self.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(ProxyError::Request("proxy unreachable".to_string()));
        }
        Ok(self.remote.lock().iter().cloned().collect())
    }
}

/// Broker double tracking live handles and per-code subscribe counts.
#[derive(Default)]
struct RecordingBroker {
    next: AtomicU64,
    live: Mutex<HashMap<TopicHandle, String>>,
    subscribe_counts: Mutex<HashMap<String, usize>>,
}

impl RecordingBroker {
    fn live_codes(&self) -> HashSet<String> {
        self.live.lock().values().cloned().collect()
    }

    fn live_handle_count(&self) -> usize {
        self.live.lock().len()
    }

    fn subscribe_count(&self, code: &str) -> usize {
        self.subscribe_counts.lock().get(code).copied().unwrap_or(0)
    }
}

impl BrokerControl for RecordingBroker {
    fn subscribe_topic(&self, code: &str) -> TopicHandle {
        let handle = TopicHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.live.lock().insert(handle, code.to_string());
        *self
            .subscribe_counts
            .lock()
            .entry(code.to_string())
            .or_insert(0) += 1;
        handle
    }

    fn unsubscribe_topic(&self, handle: TopicHandle) {
        self.live.lock().remove(&handle);
    }

    fn is_connected(&self) -> bool {
        true
    }
}

fn set(codes: &[&str]) -> HashSet<String> {
    codes.iter().map(ToString::to_string).collect()
}

fn new_reconciler() -> (Arc<RecordingBroker>, Arc<RecordingProxy>, Reconciler) {
    let broker = Arc::new(RecordingBroker::default());
    let proxy = Arc::new(RecordingProxy::default());
    let reconciler = Reconciler::new(
        Arc::clone(&broker) as Arc<dyn BrokerControl>,
        Arc::clone(&proxy) as Arc<dyn ProxyTransport>,
    );
    (broker, proxy, reconciler)
}

// =============================================================================
// Refcount scenarios
// =============================================================================

#[tokio::test]
async fn overlapping_contexts_share_one_upstream_subscription() {
    let (broker, proxy, reconciler) = new_reconciler();

    // Context A wants 005930.
    reconciler.set_context(1, set(&["005930"])).await;
    // Context B mounts wanting 005930 and 000660: only 000660 is new.
    reconciler.set_context(2, set(&["005930", "000660"])).await;

    assert_eq!(
        proxy.calls(),
        vec![
            ProxyCall::Subscribe(vec!["005930".to_string()]),
            ProxyCall::Subscribe(vec!["000660".to_string()]),
        ]
    );

    // A unmounts: both codes still held by B, no unsubscribe.
    let dropped = reconciler.release_context(1);
    assert!(dropped.is_empty());
    reconciler.finish_release(dropped).await;
    assert_eq!(proxy.remote(), set(&["005930", "000660"]));

    // B unmounts: everything goes.
    let dropped = reconciler.release_context(2);
    reconciler.finish_release(dropped).await;

    assert_eq!(
        proxy.calls().last().unwrap(),
        &ProxyCall::Unsubscribe(vec!["000660".to_string(), "005930".to_string()])
    );
    assert!(proxy.remote().is_empty());
    assert!(broker.live_codes().is_empty());
}

#[tokio::test]
async fn reconciling_the_same_set_twice_issues_nothing() {
    let (broker, proxy, reconciler) = new_reconciler();

    reconciler.set_context(1, set(&["005930", "000660"])).await;
    let calls_after_first = proxy.calls().len();
    let subscribes_after_first = broker.subscribe_count("005930");

    reconciler.set_context(1, set(&["005930", "000660"])).await;

    assert_eq!(proxy.calls().len(), calls_after_first);
    assert_eq!(broker.subscribe_count("005930"), subscribes_after_first);
}

#[tokio::test]
async fn overlapping_code_is_never_dropped_and_resubscribed() {
    let (broker, proxy, reconciler) = new_reconciler();

    reconciler.set_context(1, set(&["005930", "000660"])).await;
    // Page flip: 005930 stays visible, 000660 leaves, 035720 enters.
    reconciler.set_context(1, set(&["005930", "035720"])).await;

    // Exactly one broker subscribe ever for the overlapping code.
    assert_eq!(broker.subscribe_count("005930"), 1);
    assert_eq!(broker.live_codes(), set(&["005930", "035720"]));

    // And no proxy call mentions it after the initial subscribe.
    let later_calls = &proxy.calls()[1..];
    for call in later_calls {
        match call {
            ProxyCall::Subscribe(codes) | ProxyCall::Unsubscribe(codes) => {
                assert!(!codes.contains(&"005930".to_string()));
            }
            ProxyCall::ClearAll => panic!("no clear-all during reconciliation"),
        }
    }
}

#[tokio::test]
async fn union_equals_ledger_and_topics_after_settling() {
    let (broker, proxy, reconciler) = new_reconciler();

    reconciler.set_context(1, set(&["005930", "000660"])).await;
    reconciler.set_context(2, set(&["000660", "035720"])).await;
    reconciler.set_context(3, set(&["005380"])).await;
    reconciler.set_context(2, set(&["000660"])).await;
    let dropped = reconciler.release_context(3);
    reconciler.finish_release(dropped).await;

    let wanted = reconciler.active_codes();
    assert_eq!(wanted, set(&["005930", "000660"]));
    assert_eq!(reconciler.ledgered_codes(), wanted);
    assert_eq!(proxy.remote(), wanted);
    assert_eq!(broker.live_codes(), wanted);
}

// =============================================================================
// Failure and reconnect behavior
// =============================================================================

#[tokio::test]
async fn proxy_outage_heals_on_resync() {
    let (_broker, proxy, reconciler) = new_reconciler();

    proxy.fail_subscribe.store(true, Ordering::SeqCst);
    reconciler.set_context(1, set(&["005930"])).await;

    // Wanted survives the failed add; the ledger does not lie.
    assert_eq!(reconciler.active_codes(), set(&["005930"]));
    assert!(reconciler.ledgered_codes().is_empty());

    // Proxy comes back; the periodic pass converges.
    proxy.fail_subscribe.store(false, Ordering::SeqCst);
    reconciler.resync().await;

    assert_eq!(reconciler.ledgered_codes(), set(&["005930"]));
    assert_eq!(proxy.remote(), set(&["005930"]));
}

#[tokio::test]
async fn resync_drops_codes_the_proxy_still_holds() {
    let (_broker, proxy, reconciler) = new_reconciler();

    // A previous process died and left the proxy subscribed.
    proxy.remote.lock().insert("035720".to_string());

    reconciler.resync().await;

    assert!(proxy.remote().is_empty());
    assert!(reconciler.ledgered_codes().is_empty());
}

#[tokio::test]
async fn resync_falls_back_to_local_ledger_when_listing_fails() {
    let (_broker, proxy, reconciler) = new_reconciler();

    reconciler.set_context(1, set(&["005930"])).await;
    proxy.fail_subscriptions.store(true, Ordering::SeqCst);

    reconciler.resync().await;

    // Nothing to heal: the local ledger already matched.
    assert_eq!(reconciler.ledgered_codes(), set(&["005930"]));
}

#[tokio::test]
async fn reconnect_resubscribes_each_live_code_exactly_once() {
    let (broker, _proxy, reconciler) = new_reconciler();

    reconciler.set_context(1, set(&["005930"])).await;
    reconciler.set_context(2, set(&["005930", "000660"])).await;

    // Transport dropped: every handle is stale.
    reconciler.on_reconnected().await;

    assert_eq!(broker.subscribe_count("005930"), 2); // initial + reconnect
    assert_eq!(broker.subscribe_count("000660"), 2);
    // One fresh handle per code, no duplicates.
    assert_eq!(reconciler.topic_codes(), set(&["005930", "000660"]));
}

// =============================================================================
// Manager facade and context tokens
// =============================================================================

async fn start_manager(
    broker: Arc<RecordingBroker>,
    proxy: Arc<RecordingProxy>,
) -> (QuoteStreamManager, CancellationToken, mpsc::Sender<BrokerEvent>) {
    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel(64);
    let manager = QuoteStreamManager::start(
        broker as Arc<dyn BrokerControl>,
        event_rx,
        proxy as Arc<dyn ProxyTransport>,
        ManagerOptions {
            resync_interval: Duration::from_secs(3600),
            update_capacity: 64,
        },
        cancel.clone(),
    )
    .await;
    (manager, cancel, event_tx)
}

#[tokio::test]
async fn startup_clears_stale_proxy_state() {
    let broker = Arc::new(RecordingBroker::default());
    let proxy = Arc::new(RecordingProxy::default());
    proxy.remote.lock().insert("035720".to_string());

    let (_manager, _cancel, _event_tx) =
        start_manager(Arc::clone(&broker), Arc::clone(&proxy)).await;

    assert_eq!(proxy.calls().first().unwrap(), &ProxyCall::ClearAll);
    assert!(proxy.remote().is_empty());
}

#[tokio::test]
async fn dropping_a_token_releases_its_codes() {
    let broker = Arc::new(RecordingBroker::default());
    let proxy = Arc::new(RecordingProxy::default());
    let (manager, _cancel, _event_tx) =
        start_manager(Arc::clone(&broker), Arc::clone(&proxy)).await;

    let token = manager.register_context();
    token.set_codes(set(&["005930"])).await;
    assert_eq!(manager.active_codes(), set(&["005930"]));

    drop(token);

    // The wanted set and broker side empty synchronously.
    assert!(manager.active_codes().is_empty());
    assert!(broker.live_codes().is_empty());

    // The proxy side completes in the background.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.ledgered_codes().is_empty());
    assert!(proxy.remote().is_empty());
}

#[tokio::test]
async fn shutdown_after_all_contexts_unmount_leaves_nothing_behind() {
    let broker = Arc::new(RecordingBroker::default());
    let proxy = Arc::new(RecordingProxy::default());
    let (manager, _cancel, _event_tx) =
        start_manager(Arc::clone(&broker), Arc::clone(&proxy)).await;

    let a = manager.register_context();
    let b = manager.register_context();
    a.set_codes(set(&["005930"])).await;
    b.set_codes(set(&["005930", "000660"])).await;

    a.close().await;
    b.close().await;
    manager.shutdown().await;

    assert!(manager.ledgered_codes().is_empty());
    assert!(broker.live_codes().is_empty());
    assert_eq!(broker.live_handle_count(), 0);
    assert!(proxy.remote().is_empty());
    assert_eq!(proxy.calls().last().unwrap(), &ProxyCall::ClearAll);
}

#[tokio::test]
async fn quote_events_flow_into_cache_and_broadcast() {
    use chrono::Utc;
    use quote_stream_manager::Quote;
    use rust_decimal::Decimal;

    let broker = Arc::new(RecordingBroker::default());
    let proxy = Arc::new(RecordingProxy::default());
    let (manager, _cancel, event_tx) =
        start_manager(Arc::clone(&broker), Arc::clone(&proxy)).await;

    let mut updates = manager.updates_rx();

    let quote = Quote {
        code: "005930".to_string(),
        price: Decimal::from(82_000),
        price_change: Decimal::from(1_200),
        change_rate: Decimal::new(149, 2),
        received_at: Utc::now(),
    };
    event_tx
        .send(BrokerEvent::Quote(quote.clone()))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), updates.recv())
        .await
        .expect("timeout")
        .expect("closed");
    assert_eq!(received, quote);
    assert_eq!(manager.cache().get("005930"), Some(quote));
}

#[tokio::test]
async fn reconnect_event_sequence_rebuilds_topics() {
    let broker = Arc::new(RecordingBroker::default());
    let proxy = Arc::new(RecordingProxy::default());
    let (manager, _cancel, event_tx) =
        start_manager(Arc::clone(&broker), Arc::clone(&proxy)).await;

    let token = manager.register_context();
    token.set_codes(set(&["005930"])).await;
    assert_eq!(broker.subscribe_count("005930"), 1);

    event_tx.send(BrokerEvent::Disconnected).await.unwrap();
    event_tx.send(BrokerEvent::Connected).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(broker.subscribe_count("005930"), 2);
    assert_eq!(broker.live_codes(), set(&["005930"]));

    // A second Connected without an intervening drop must not resubscribe.
    event_tx.send(BrokerEvent::Connected).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.subscribe_count("005930"), 2);
}
