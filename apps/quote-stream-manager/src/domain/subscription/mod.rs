//! Subscription Set Bookkeeping
//!
//! Tracks which ticker codes each UI context currently wants, with
//! reference counting across contexts.
//!
//! # Design
//!
//! A context's wanted set is replaced wholesale on every recomputation
//! (pagination, keyword change, navigation) rather than edited
//! incrementally. Reference counts turn those wholesale replacements into
//! minimal upstream changes: a code is subscribed upstream only on its
//! 0→1 transition and unsubscribed only on 1→0, so a code wanted by two
//! contexts survives either one leaving, and a code kept across a
//! replacement is never transiently dropped.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::domain::quote::TickerCode;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a UI context (a page, a list, a detail view).
pub type ContextId = u64;

// =============================================================================
// Subscription Changes
// =============================================================================

/// Minimal upstream actions resulting from one wanted-set change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Codes that must be subscribed upstream (refcount went 0→1).
    pub subscribe: HashSet<TickerCode>,
    /// Codes that must be unsubscribed upstream (refcount went 1→0).
    pub unsubscribe: HashSet<TickerCode>,
}

impl SubscriptionChanges {
    /// Check if there is nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

// =============================================================================
// Internal state
// =============================================================================

#[derive(Debug, Default)]
struct SubscriptionState {
    /// Map from context to its current wanted set.
    context_codes: HashMap<ContextId, HashSet<TickerCode>>,
    /// Map from code to the number of contexts wanting it.
    code_refcount: HashMap<TickerCode, usize>,
}

impl SubscriptionState {
    /// Replace a context's wanted set wholesale.
    fn replace(&mut self, context: ContextId, new_set: HashSet<TickerCode>) -> SubscriptionChanges {
        let old_set = if new_set.is_empty() {
            self.context_codes.remove(&context).unwrap_or_default()
        } else {
            self.context_codes
                .insert(context, new_set.clone())
                .unwrap_or_default()
        };

        let mut changes = SubscriptionChanges::default();

        for code in new_set.difference(&old_set) {
            let refcount = self.code_refcount.entry(code.clone()).or_insert(0);
            *refcount += 1;
            if *refcount == 1 {
                changes.subscribe.insert(code.clone());
            }
        }

        for code in old_set.difference(&new_set) {
            if let Some(refcount) = self.code_refcount.get_mut(code) {
                *refcount = refcount.saturating_sub(1);
                if *refcount == 0 {
                    self.code_refcount.remove(code);
                    changes.unsubscribe.insert(code.clone());
                }
            }
        }

        changes
    }
}

// =============================================================================
// Subscription Manager
// =============================================================================

/// Reference-counted subscription bookkeeping across all UI contexts.
///
/// Thread-safe; only the reconciler acts on the returned changes, but any
/// context may declare its wanted set from any task.
///
/// # Example
///
/// ```rust
/// use std::collections::HashSet;
/// use quote_stream_manager::domain::subscription::SubscriptionManager;
///
/// let subs = SubscriptionManager::new();
///
/// let wanted: HashSet<_> = ["005930".to_string()].into();
/// let changes = subs.replace_context(1, wanted.clone());
/// assert!(changes.subscribe.contains("005930"));
///
/// // A second context wanting the same code needs no upstream change.
/// let changes = subs.replace_context(2, wanted);
/// assert!(changes.is_empty());
///
/// // The first context leaving does not unsubscribe the shared code.
/// let changes = subs.remove_context(1);
/// assert!(changes.unsubscribe.is_empty());
///
/// // The last context leaving does.
/// let changes = subs.remove_context(2);
/// assert!(changes.unsubscribe.contains("005930"));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    state: RwLock<SubscriptionState>,
}

impl SubscriptionManager {
    /// Create an empty subscription manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a context's wanted set wholesale.
    ///
    /// Returns the minimal upstream changes. Codes present in both the
    /// old and new sets are untouched, so replacing a set with itself
    /// returns empty changes.
    pub fn replace_context(
        &self,
        context: ContextId,
        new_set: HashSet<TickerCode>,
    ) -> SubscriptionChanges {
        self.state.write().replace(context, new_set)
    }

    /// Remove a context entirely (unmount).
    ///
    /// Equivalent to replacing its wanted set with the empty set.
    pub fn remove_context(&self, context: ContextId) -> SubscriptionChanges {
        self.state.write().replace(context, HashSet::new())
    }

    /// The reference-counted union of every live context's wanted set.
    #[must_use]
    pub fn active_codes(&self) -> HashSet<TickerCode> {
        self.state.read().code_refcount.keys().cloned().collect()
    }

    /// The wanted set of one context, empty if unknown.
    #[must_use]
    pub fn context_codes(&self, context: ContextId) -> HashSet<TickerCode> {
        self.state
            .read()
            .context_codes
            .get(&context)
            .cloned()
            .unwrap_or_default()
    }

    /// Current bookkeeping counters.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            code_count: state.code_refcount.len(),
            context_count: state.context_codes.len(),
        }
    }
}

/// Bookkeeping counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of distinct codes with a nonzero reference count.
    pub code_count: usize,
    /// Number of contexts with a nonempty wanted set.
    pub context_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
