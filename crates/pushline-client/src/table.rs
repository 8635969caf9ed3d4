//! Registry of active subscriptions keyed by table number

use std::collections::HashMap;

use crate::subscription::Subscription;

/// Maps table keys to registered subscriptions.
///
/// Keys are strictly increasing positive integers, assigned at registration
/// and never reused within one client lifetime; the server references them
/// in every data line it pushes.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionTable {
    entries: HashMap<u64, Subscription>,
    next_key: u64,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next key and register the subscription under it.
    pub fn register(&mut self, subscription: Subscription) -> u64 {
        self.next_key += 1;
        self.entries.insert(self.next_key, subscription);
        self.next_key
    }

    pub fn remove(&mut self, key: u64) -> Option<Subscription> {
        self.entries.remove(&key)
    }

    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn get_mut(&mut self, key: u64) -> Option<&mut Subscription> {
        self.entries.get_mut(&key)
    }

    /// Snapshot of the registered keys, in ascending order.
    pub fn keys(&self) -> Vec<u64> {
        let mut keys: Vec<u64> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry and restart the key sequence; used when a terminal
    /// stream outcome tears the session down.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.next_key = 0;
    }
}
