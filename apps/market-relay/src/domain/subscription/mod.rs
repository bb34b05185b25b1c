//! Subscription Registry
//!
//! Reference-counted bookkeeping of which parties (relay clients or local
//! widgets) are interested in which subscription keys.
//!
//! # Design
//!
//! The registry tracks, per feed partition:
//! - Which keys each party is interested in
//! - Which parties are interested in each key
//!
//! A key is present in a partition if and only if at least one party holds
//! interest in it, and it is subscribed upstream if and only if it is
//! present. Every mutation reports the absent→present and present→absent
//! transitions so the caller can issue exactly one upstream subscribe and
//! one upstream unsubscribe per key lifetime.
//!
//! Each partition sits behind its own lock. The transition decision is taken
//! while the lock is held; upstream I/O happens after the lock is released.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use parking_lot::RwLock;

// =============================================================================
// Types
// =============================================================================

/// Opaque identifier for a downstream relay client.
pub type ClientId = String;

/// Equity ticker or vendor option-contract id.
pub type SubscriptionKey = String;

/// Upstream feed partition. Equity and option keys never share a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feed {
    /// Stock tickers (e.g. `AAPL`).
    Equities,
    /// Option contract ids (e.g. `O:SPY251219C00650000`).
    Options,
}

impl Feed {
    /// Get all feed partitions.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Equities, Self::Options]
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equities => "equities",
            Self::Options => "options",
        }
    }

    /// Normalize a raw key for this partition.
    ///
    /// Equity tickers are trimmed and upper-cased; option contract ids are
    /// only trimmed. Returns `None` for keys that are empty after trimming.
    #[must_use]
    pub fn normalize_key(self, raw: &str) -> Option<SubscriptionKey> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(match self {
            Self::Equities => trimmed.to_uppercase(),
            Self::Options => trimmed.to_string(),
        })
    }

    /// Normalize a batch of raw keys, dropping empties and duplicates.
    /// First-seen order is kept.
    #[must_use]
    pub fn normalize_keys<S: AsRef<str>>(self, raw: &[S]) -> Vec<SubscriptionKey> {
        let mut seen = HashSet::with_capacity(raw.len());
        raw.iter()
            .filter_map(|k| self.normalize_key(k.as_ref()))
            .filter(|k| seen.insert(k.clone()))
            .collect()
    }
}

impl std::fmt::Display for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of registering interest in a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    /// True exactly when the key went from absent to present.
    pub is_new_subscription: bool,
}

/// Outcome of removing interest in a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    /// True exactly when the key went from present to absent.
    pub should_unsubscribe: bool,
}

/// One key released by [`SubscriptionRegistry::remove_client`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedKey {
    /// The key the party held.
    pub key: SubscriptionKey,
    /// Whether this was the last interested party.
    pub should_unsubscribe: bool,
}

// =============================================================================
// Partition State
// =============================================================================

/// Bookkeeping for a single feed partition.
#[derive(Debug)]
struct Partition<C> {
    /// Key to the set of interested parties. Never holds an empty set.
    key_parties: HashMap<SubscriptionKey, HashSet<C>>,
    /// Party to the set of keys it holds. Never holds an empty set.
    party_keys: HashMap<C, HashSet<SubscriptionKey>>,
}

impl<C> Default for Partition<C> {
    fn default() -> Self {
        Self {
            key_parties: HashMap::new(),
            party_keys: HashMap::new(),
        }
    }
}

impl<C: Clone + Eq + Hash> Partition<C> {
    fn add(&mut self, key: &str, party: &C) -> Interest {
        let parties = self.key_parties.entry(key.to_string()).or_default();
        let is_new_subscription = parties.is_empty();
        parties.insert(party.clone());

        self.party_keys
            .entry(party.clone())
            .or_default()
            .insert(key.to_string());

        Interest {
            is_new_subscription,
        }
    }

    fn remove(&mut self, key: &str, party: &C) -> Release {
        let Some(parties) = self.key_parties.get_mut(key) else {
            return Release {
                should_unsubscribe: false,
            };
        };

        if !parties.remove(party) {
            return Release {
                should_unsubscribe: false,
            };
        }

        let should_unsubscribe = parties.is_empty();
        if should_unsubscribe {
            self.key_parties.remove(key);
        }

        if let Some(keys) = self.party_keys.get_mut(party) {
            keys.remove(key);
            if keys.is_empty() {
                self.party_keys.remove(party);
            }
        }

        Release { should_unsubscribe }
    }

    fn remove_party(&mut self, party: &C) -> Vec<ReleasedKey> {
        let Some(keys) = self.party_keys.remove(party) else {
            return vec![];
        };

        let mut keys: Vec<_> = keys.into_iter().collect();
        keys.sort_unstable();

        keys.into_iter()
            .map(|key| {
                let should_unsubscribe = match self.key_parties.get_mut(&key) {
                    Some(parties) => {
                        parties.remove(party);
                        parties.is_empty()
                    }
                    None => false,
                };
                if should_unsubscribe {
                    self.key_parties.remove(&key);
                }
                ReleasedKey {
                    key,
                    should_unsubscribe,
                }
            })
            .collect()
    }

    fn keys_for(&self, party: &C) -> HashSet<SubscriptionKey> {
        self.party_keys.get(party).cloned().unwrap_or_default()
    }

    fn parties_for(&self, key: &str) -> HashSet<C> {
        self.key_parties.get(key).cloned().unwrap_or_default()
    }

    fn active_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.key_parties.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Reference-counted subscription registry, one partition per [`Feed`].
///
/// Generic over the interested-party id so the relay (keyed by
/// [`ClientId`]) and the client connection manager (keyed by widget id)
/// share one implementation.
///
/// # Example
///
/// ```rust
/// use market_relay::domain::subscription::{Feed, SubscriptionRegistry};
///
/// let registry: SubscriptionRegistry = SubscriptionRegistry::new();
///
/// // First client: upstream subscribe needed
/// let first = registry.add_interest(Feed::Equities, "AAPL", &"c1".to_string());
/// assert!(first.is_new_subscription);
///
/// // Second client: already subscribed upstream
/// let second = registry.add_interest(Feed::Equities, "AAPL", &"c2".to_string());
/// assert!(!second.is_new_subscription);
///
/// // First client leaves: still held by the second
/// let release = registry.remove_interest(Feed::Equities, "AAPL", &"c1".to_string());
/// assert!(!release.should_unsubscribe);
///
/// // Last client leaves: upstream unsubscribe needed
/// let release = registry.remove_interest(Feed::Equities, "AAPL", &"c2".to_string());
/// assert!(release.should_unsubscribe);
/// ```
pub struct SubscriptionRegistry<C = ClientId> {
    equities: RwLock<Partition<C>>,
    options: RwLock<Partition<C>>,
}

impl<C> Default for SubscriptionRegistry<C> {
    fn default() -> Self {
        Self {
            equities: RwLock::new(Partition::default()),
            options: RwLock::new(Partition::default()),
        }
    }
}

impl<C> std::fmt::Debug for SubscriptionRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("equities", &self.equities.read().key_parties.len())
            .field("options", &self.options.read().key_parties.len())
            .finish()
    }
}

impl<C: Clone + Eq + Hash> SubscriptionRegistry<C> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `party`'s interest in `key`.
    ///
    /// Registering the same interest twice is idempotent and never reports
    /// a new subscription the second time.
    pub fn add_interest(&self, feed: Feed, key: &str, party: &C) -> Interest {
        self.partition(feed).write().add(key, party)
    }

    /// Remove `party`'s interest in `key`.
    ///
    /// Removing interest that was never registered is a no-op.
    pub fn remove_interest(&self, feed: Feed, key: &str, party: &C) -> Release {
        self.partition(feed).write().remove(key, party)
    }

    /// Register interest in a batch of keys under one lock acquisition.
    ///
    /// Returns the keys that went from absent to present, in input order.
    pub fn add_interests(&self, feed: Feed, party: &C, keys: &[SubscriptionKey]) -> Vec<SubscriptionKey> {
        self.add_interests_with(feed, party, keys, |_| {})
    }

    /// [`add_interests`](Self::add_interests), calling `on_new` with the
    /// keys that went absent to present before the partition lock is
    /// released.
    ///
    /// Transitions of one partition reach `on_new` in the order they were
    /// decided. The callback must not block or touch this registry. It is
    /// not called when nothing transitioned.
    pub fn add_interests_with<F>(
        &self,
        feed: Feed,
        party: &C,
        keys: &[SubscriptionKey],
        on_new: F,
    ) -> Vec<SubscriptionKey>
    where
        F: FnOnce(&[SubscriptionKey]),
    {
        let mut partition = self.partition(feed).write();
        let new_keys: Vec<_> = keys
            .iter()
            .filter(|key| partition.add(key, party).is_new_subscription)
            .cloned()
            .collect();
        if !new_keys.is_empty() {
            on_new(&new_keys);
        }
        new_keys
    }

    /// Remove interest in a batch of keys under one lock acquisition.
    ///
    /// Returns the keys that went from present to absent, in input order.
    pub fn remove_interests(
        &self,
        feed: Feed,
        party: &C,
        keys: &[SubscriptionKey],
    ) -> Vec<SubscriptionKey> {
        self.remove_interests_with(feed, party, keys, |_| {})
    }

    /// [`remove_interests`](Self::remove_interests), calling `on_released`
    /// with the keys that went present to absent before the partition lock
    /// is released. Same callback rules as
    /// [`add_interests_with`](Self::add_interests_with).
    pub fn remove_interests_with<F>(
        &self,
        feed: Feed,
        party: &C,
        keys: &[SubscriptionKey],
        on_released: F,
    ) -> Vec<SubscriptionKey>
    where
        F: FnOnce(&[SubscriptionKey]),
    {
        let mut partition = self.partition(feed).write();
        let released: Vec<_> = keys
            .iter()
            .filter(|key| partition.remove(key, party).should_unsubscribe)
            .cloned()
            .collect();
        if !released.is_empty() {
            on_released(&released);
        }
        released
    }

    /// Release every key `party` holds in one partition.
    ///
    /// Returns one entry per released key, flagging the keys that lost their
    /// last interested party.
    pub fn remove_client(&self, feed: Feed, party: &C) -> Vec<ReleasedKey> {
        self.partition(feed).write().remove_party(party)
    }

    /// Release every key `party` holds across all partitions.
    ///
    /// Returns only the keys needing upstream unsubscription, grouped by
    /// feed. Feeds with nothing to unsubscribe are omitted.
    pub fn release_client(&self, party: &C) -> HashMap<Feed, Vec<SubscriptionKey>> {
        self.release_client_with(party, |_, _| {})
    }

    /// [`release_client`](Self::release_client), calling `on_released` per
    /// feed while that partition's lock is held. Same callback rules as
    /// [`add_interests_with`](Self::add_interests_with).
    pub fn release_client_with<F>(
        &self,
        party: &C,
        mut on_released: F,
    ) -> HashMap<Feed, Vec<SubscriptionKey>>
    where
        F: FnMut(Feed, &[SubscriptionKey]),
    {
        let mut changes = HashMap::new();

        for feed in Feed::all() {
            let mut partition = self.partition(*feed).write();
            let released: Vec<_> = partition
                .remove_party(party)
                .into_iter()
                .filter(|r| r.should_unsubscribe)
                .map(|r| r.key)
                .collect();

            if !released.is_empty() {
                on_released(*feed, &released);
                changes.insert(*feed, released);
            }
        }

        changes
    }

    /// Keys `party` currently holds in a partition.
    #[must_use]
    pub fn keys_interested_for(&self, feed: Feed, party: &C) -> HashSet<SubscriptionKey> {
        self.partition(feed).read().keys_for(party)
    }

    /// Parties currently interested in `key`.
    #[must_use]
    pub fn clients_interested_in(&self, feed: Feed, key: &str) -> HashSet<C> {
        self.partition(feed).read().parties_for(key)
    }

    /// Whether `key` is present (and therefore subscribed upstream).
    #[must_use]
    pub fn contains(&self, feed: Feed, key: &str) -> bool {
        self.partition(feed).read().key_parties.contains_key(key)
    }

    /// Sorted snapshot of every present key in a partition.
    #[must_use]
    pub fn active_keys(&self, feed: Feed) -> Vec<SubscriptionKey> {
        self.partition(feed).read().active_keys()
    }

    /// Run `f` over sorted snapshots of both partitions (equities, options)
    /// while holding both read locks, so no transition lands between the
    /// snapshot and whatever `f` installs.
    pub fn with_active_keys<R, F>(&self, f: F) -> R
    where
        F: FnOnce(Vec<SubscriptionKey>, Vec<SubscriptionKey>) -> R,
    {
        let equities = self.equities.read();
        let options = self.options.read();
        f(equities.active_keys(), options.active_keys())
    }

    /// Statistics for one partition.
    #[must_use]
    pub fn stats(&self, feed: Feed) -> SubscriptionStats {
        let partition = self.partition(feed).read();
        SubscriptionStats {
            key_count: partition.key_parties.len(),
            party_count: partition.party_keys.len(),
        }
    }

    /// Statistics for all partitions.
    #[must_use]
    pub fn total_stats(&self) -> TotalSubscriptionStats {
        TotalSubscriptionStats {
            equities: self.stats(Feed::Equities),
            options: self.stats(Feed::Options),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_partition_locked(&self, feed: Feed) -> bool {
        self.partition(feed).is_locked_exclusive()
    }

    const fn partition(&self, feed: Feed) -> &RwLock<Partition<C>> {
        match feed {
            Feed::Equities => &self.equities,
            Feed::Options => &self.options,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for a single partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of present keys.
    pub key_count: usize,
    /// Number of parties holding at least one key.
    pub party_count: usize,
}

/// Statistics across both partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TotalSubscriptionStats {
    /// Equity partition stats.
    pub equities: SubscriptionStats,
    /// Option partition stats.
    pub options: SubscriptionStats,
}

// =============================================================================
// Tests
// =============================================================================
