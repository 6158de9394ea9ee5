//! Reconciler and Manager Facade
//!
//! The reconciler converts wholesale wanted-set replacements into minimal
//! proxy and broker actions; the manager owns the shared resources and
//! hands lightweight context tokens to UI contexts.
//!
//! # Failure model
//!
//! Nothing here propagates errors to callers. A failed proxy call leaves
//! the ledger out of sync with the wanted set, and the periodic
//! [`Reconciler::resync`] converges the two. Transport loss is handled by
//! resubscribing the then-current union once the connection returns.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{BrokerControl, BrokerEvent, ProxyTransport, TopicHandle};
use crate::domain::quote::{Quote, QuoteCache, TickerCode};
use crate::domain::subscription::{
    ContextId, SubscriptionChanges, SubscriptionManager, SubscriptionStats,
};

// =============================================================================
// Reconciler
// =============================================================================

/// Drives the proxy ledger and the broker topic table toward the
/// reference-counted union of all contexts' wanted sets.
///
/// Cycles are serialized: a new reconciliation waits until the prior
/// cycle's add/remove calls have been issued before computing its diff,
/// which keeps a fast-paginating context from piling up duplicate
/// subscribe requests.
pub struct Reconciler {
    subs: SubscriptionManager,
    /// Codes currently believed subscribed at the external proxy.
    ledger: RwLock<HashSet<TickerCode>>,
    /// Live topic handles, one per subscribed code.
    topics: Mutex<HashMap<TickerCode, TopicHandle>>,
    broker: Arc<dyn BrokerControl>,
    proxy: Arc<dyn ProxyTransport>,
    cycle: tokio::sync::Mutex<()>,
}

impl Reconciler {
    /// Create a reconciler over the given transports.
    #[must_use]
    pub fn new(broker: Arc<dyn BrokerControl>, proxy: Arc<dyn ProxyTransport>) -> Self {
        Self {
            subs: SubscriptionManager::new(),
            ledger: RwLock::new(HashSet::new()),
            topics: Mutex::new(HashMap::new()),
            broker,
            proxy,
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace one context's wanted set and converge upstream state.
    pub async fn set_context(&self, context: ContextId, codes: HashSet<TickerCode>) {
        let _cycle = self.cycle.lock().await;
        let changes = self.subs.replace_context(context, codes);
        self.apply(changes).await;
    }

    /// Synchronously empty a context's wanted set.
    ///
    /// Called on unmount, including from `Drop`, so it must not await:
    /// broker unsubscribes are issued immediately (channel sends), and the
    /// codes needing a proxy unsubscribe are returned for
    /// [`Reconciler::finish_release`] to complete.
    pub fn release_context(&self, context: ContextId) -> Vec<TickerCode> {
        let changes = self.subs.remove_context(context);
        if changes.is_empty() {
            return Vec::new();
        }

        {
            let mut topics = self.topics.lock();
            for code in &changes.unsubscribe {
                if let Some(handle) = topics.remove(code) {
                    self.broker.unsubscribe_topic(handle);
                }
            }
        }

        let mut dropped: Vec<_> = changes.unsubscribe.into_iter().collect();
        dropped.sort();
        dropped
    }

    /// Complete the proxy side of a context release.
    pub async fn finish_release(&self, codes: Vec<TickerCode>) {
        if codes.is_empty() {
            return;
        }
        let _cycle = self.cycle.lock().await;
        match self.proxy.unsubscribe(&codes).await {
            Ok(()) => {
                let mut ledger = self.ledger.write();
                for code in &codes {
                    ledger.remove(code);
                }
            }
            Err(error) => {
                tracing::warn!(%error, count = codes.len(), "proxy unsubscribe failed");
            }
        }
    }

    /// Periodic self-healing pass.
    ///
    /// Replaces the believed ledger with the proxy's actual subscription
    /// list when reachable, then retries whatever the wanted set and the
    /// upstream state still disagree on, in both directions.
    pub async fn resync(&self) {
        let _cycle = self.cycle.lock().await;
        let wanted = self.subs.active_codes();

        match self.proxy.subscriptions().await {
            Ok(remote) => {
                *self.ledger.write() = remote.into_iter().collect();
            }
            Err(error) => {
                tracing::debug!(%error, "proxy subscription list unavailable, using local ledger");
            }
        }

        let ledgered = self.ledger.read().clone();

        let mut missing: Vec<_> = wanted.difference(&ledgered).cloned().collect();
        missing.sort();
        if !missing.is_empty() {
            tracing::info!(count = missing.len(), "resubscribing codes missing at proxy");
            if self.proxy.subscribe(&missing).await.is_ok() {
                self.ledger.write().extend(missing);
            }
        }

        let mut stale: Vec<_> = ledgered.difference(&wanted).cloned().collect();
        stale.sort();
        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "dropping codes no longer wanted at proxy");
            if self.proxy.unsubscribe(&stale).await.is_ok() {
                let mut ledger = self.ledger.write();
                for code in &stale {
                    ledger.remove(code);
                }
            }
        }

        if self.broker.is_connected() {
            let mut topics = self.topics.lock();
            for code in &wanted {
                if !topics.contains_key(code) {
                    topics.insert(code.clone(), self.broker.subscribe_topic(code));
                }
            }
            let gone: Vec<_> = topics
                .keys()
                .filter(|code| !wanted.contains(*code))
                .cloned()
                .collect();
            for code in gone {
                if let Some(handle) = topics.remove(&code) {
                    self.broker.unsubscribe_topic(handle);
                }
            }
        }
    }

    /// Rebuild broker subscriptions after a transport loss.
    ///
    /// The connection forgets all topic state across a disconnect, so
    /// every outstanding handle is stale: drop them and subscribe the
    /// current union exactly once, one fresh handle per code.
    pub async fn on_reconnected(&self) {
        let _cycle = self.cycle.lock().await;
        let wanted = self.subs.active_codes();
        let mut topics = self.topics.lock();
        topics.clear();
        for code in &wanted {
            topics.insert(code.clone(), self.broker.subscribe_topic(code));
        }
        tracing::info!(count = wanted.len(), "resubscribed topics after reconnect");
    }

    /// Final teardown: drop every remaining topic subscription and clear
    /// the proxy wholesale. Invoked once, at application shutdown.
    pub async fn teardown(&self) {
        let _cycle = self.cycle.lock().await;
        {
            let mut topics = self.topics.lock();
            for (_, handle) in topics.drain() {
                self.broker.unsubscribe_topic(handle);
            }
        }
        if let Err(error) = self.proxy.clear_all().await {
            tracing::warn!(%error, "proxy clear-all failed at teardown");
        }
        self.ledger.write().clear();
    }

    /// Apply one set of changes: adds before removes, so a code staying
    /// subscribed across a replacement is never transiently dropped.
    async fn apply(&self, changes: SubscriptionChanges) {
        if changes.is_empty() {
            return;
        }

        if !changes.subscribe.is_empty() {
            {
                let mut topics = self.topics.lock();
                for code in &changes.subscribe {
                    topics.insert(code.clone(), self.broker.subscribe_topic(code));
                }
            }
            let mut batch: Vec<_> = changes.subscribe.into_iter().collect();
            batch.sort();
            match self.proxy.subscribe(&batch).await {
                Ok(()) => self.ledger.write().extend(batch),
                Err(error) => {
                    tracing::warn!(%error, count = batch.len(), "proxy subscribe failed");
                }
            }
        }

        if !changes.unsubscribe.is_empty() {
            {
                let mut topics = self.topics.lock();
                for code in &changes.unsubscribe {
                    if let Some(handle) = topics.remove(code) {
                        self.broker.unsubscribe_topic(handle);
                    }
                }
            }
            let mut batch: Vec<_> = changes.unsubscribe.into_iter().collect();
            batch.sort();
            match self.proxy.unsubscribe(&batch).await {
                Ok(()) => {
                    let mut ledger = self.ledger.write();
                    for code in &batch {
                        ledger.remove(code);
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, count = batch.len(), "proxy unsubscribe failed");
                }
            }
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Reference-counted union of all contexts' wanted sets.
    #[must_use]
    pub fn active_codes(&self) -> HashSet<TickerCode> {
        self.subs.active_codes()
    }

    /// Codes currently believed subscribed at the proxy.
    #[must_use]
    pub fn ledgered_codes(&self) -> HashSet<TickerCode> {
        self.ledger.read().clone()
    }

    /// Codes with a live broker topic subscription.
    #[must_use]
    pub fn topic_codes(&self) -> HashSet<TickerCode> {
        self.topics.lock().keys().cloned().collect()
    }

    /// Subscription bookkeeping counters.
    #[must_use]
    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.subs.stats()
    }
}

// =============================================================================
// Manager Facade
// =============================================================================

/// Tuning knobs for the manager's background tasks.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Interval between self-healing resync passes.
    pub resync_interval: Duration,
    /// Capacity of the quote update broadcast channel.
    pub update_capacity: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(30),
            update_capacity: 1_024,
        }
    }
}

struct ManagerShared {
    reconciler: Arc<Reconciler>,
    cache: Arc<QuoteCache>,
    updates_tx: broadcast::Sender<Quote>,
    release_tx: mpsc::UnboundedSender<Vec<TickerCode>>,
    cancel: CancellationToken,
    next_context: AtomicU64,
    torn_down: AtomicBool,
}

/// The single owned service instance of the quote subscription manager.
///
/// Owns the shared reconciler, the quote cache, and the background tasks
/// (broker event pump, periodic resync, release drain). UI contexts hold
/// only a [`ContextToken`], never the shared connection.
pub struct QuoteStreamManager {
    shared: Arc<ManagerShared>,
}

impl QuoteStreamManager {
    /// Start the manager over the given transports.
    ///
    /// Clears the proxy once so the process starts from an empty ledger
    /// (a crashed predecessor may have left subscriptions behind), then
    /// spawns the background tasks. The tasks stop when `cancel` fires.
    pub async fn start(
        broker: Arc<dyn BrokerControl>,
        events: mpsc::Receiver<BrokerEvent>,
        proxy: Arc<dyn ProxyTransport>,
        options: ManagerOptions,
        cancel: CancellationToken,
    ) -> Self {
        if let Err(error) = proxy.clear_all().await {
            tracing::warn!(%error, "proxy clear-all failed at startup");
        }

        let reconciler = Arc::new(Reconciler::new(broker, proxy));
        let (updates_tx, _) = broadcast::channel(options.update_capacity);
        let (release_tx, release_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(ManagerShared {
            reconciler,
            cache: Arc::new(QuoteCache::new()),
            updates_tx,
            release_tx,
            cancel,
            next_context: AtomicU64::new(1),
            torn_down: AtomicBool::new(false),
        });

        tokio::spawn(run_event_pump(Arc::clone(&shared), events));
        tokio::spawn(run_resync_loop(
            Arc::clone(&shared),
            options.resync_interval,
        ));
        tokio::spawn(run_release_drain(Arc::clone(&shared), release_rx));

        Self { shared }
    }

    /// Register a new UI context and get its token.
    #[must_use]
    pub fn register_context(&self) -> ContextToken {
        let id = self.shared.next_context.fetch_add(1, Ordering::Relaxed);
        ContextToken {
            id,
            shared: Arc::clone(&self.shared),
            released: AtomicBool::new(false),
        }
    }

    /// Receiver of every quote applied to the cache.
    #[must_use]
    pub fn updates_rx(&self) -> broadcast::Receiver<Quote> {
        self.shared.updates_tx.subscribe()
    }

    /// The shared latest-quote cache.
    #[must_use]
    pub fn cache(&self) -> Arc<QuoteCache> {
        Arc::clone(&self.shared.cache)
    }

    /// Reference-counted union of all live contexts' wanted codes.
    #[must_use]
    pub fn active_codes(&self) -> HashSet<TickerCode> {
        self.shared.reconciler.active_codes()
    }

    /// Codes currently believed subscribed at the proxy.
    #[must_use]
    pub fn ledgered_codes(&self) -> HashSet<TickerCode> {
        self.shared.reconciler.ledgered_codes()
    }

    /// Subscription bookkeeping counters.
    #[must_use]
    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.shared.reconciler.subscription_stats()
    }

    /// Run one self-healing resync pass immediately.
    pub async fn resync_now(&self) {
        self.shared.reconciler.resync().await;
    }

    /// Stop the background tasks and clear all upstream subscriptions.
    ///
    /// Idempotent; the first call wins.
    pub async fn shutdown(&self) {
        if self.shared.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.cancel.cancel();
        self.shared.reconciler.teardown().await;
    }
}

// =============================================================================
// Context Token
// =============================================================================

/// Lightweight handle one UI context holds on the manager.
///
/// Declares the context's wanted codes; never touches transport or proxy
/// directly. Dropping the token empties the context's subscription set
/// synchronously (broker unsubscribes are issued before the next await
/// point) and the proxy side completes in the background.
pub struct ContextToken {
    id: ContextId,
    shared: Arc<ManagerShared>,
    released: AtomicBool,
}

impl ContextToken {
    /// This context's identifier.
    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// Declare the codes this context wants right now.
    ///
    /// The previous wanted set is replaced wholesale; the manager works
    /// out the minimal upstream changes.
    pub async fn set_codes<I>(&self, codes: I)
    where
        I: IntoIterator<Item = TickerCode>,
    {
        let wanted: HashSet<TickerCode> = codes.into_iter().collect();
        self.shared.reconciler.set_context(self.id, wanted).await;
    }

    /// Release the context explicitly, completing the proxy unsubscribe
    /// before returning.
    pub async fn close(self) {
        self.released.store(true, Ordering::SeqCst);
        let dropped = self.shared.reconciler.release_context(self.id);
        self.shared.reconciler.finish_release(dropped).await;
    }
}

impl Drop for ContextToken {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped = self.shared.reconciler.release_context(self.id);
        if !dropped.is_empty() {
            // Event-loop tasks may already be gone during shutdown; the
            // teardown clear-all covers the proxy side then.
            let _ = self.shared.release_tx.send(dropped);
        }
    }
}

// =============================================================================
// Background tasks
// =============================================================================

async fn run_event_pump(shared: Arc<ManagerShared>, mut events: mpsc::Receiver<BrokerEvent>) {
    let mut seen_disconnect = false;

    loop {
        tokio::select! {
            () = shared.cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    BrokerEvent::Connected => {
                        tracing::info!("broker connected");
                        if seen_disconnect {
                            seen_disconnect = false;
                            shared.reconciler.on_reconnected().await;
                        }
                    }
                    BrokerEvent::Disconnected => {
                        tracing::warn!("broker disconnected");
                        seen_disconnect = true;
                    }
                    BrokerEvent::Reconnecting { attempt } => {
                        tracing::info!(attempt, "broker reconnecting");
                    }
                    BrokerEvent::Quote(quote) => {
                        shared.cache.insert(quote.clone());
                        let _ = shared.updates_tx.send(quote);
                    }
                    BrokerEvent::Error(message) => {
                        tracing::error!(error = %message, "broker error");
                    }
                }
            }
        }
    }
}

async fn run_resync_loop(shared: Arc<ManagerShared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The immediate first tick would race startup; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shared.cancel.cancelled() => break,
            _ = ticker.tick() => shared.reconciler.resync().await,
        }
    }
}

async fn run_release_drain(
    shared: Arc<ManagerShared>,
    mut release_rx: mpsc::UnboundedReceiver<Vec<TickerCode>>,
) {
    loop {
        tokio::select! {
            () = shared.cancel.cancelled() => break,
            dropped = release_rx.recv() => {
                let Some(dropped) = dropped else { break };
                shared.reconciler.finish_release(dropped).await;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
