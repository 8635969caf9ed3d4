//! Subscriptions: item/field schema, listeners, and incremental item state

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use pushline_core::{decode_field, ItemUpdate, Mode, ProtocolError, ProtocolResult, UpdateLine};

pub(crate) type Listener = Arc<dyn Fn(&ItemUpdate) + Send + Sync>;

/// A subscription to a set of items and fields, to be registered with
/// [`PushClient::subscribe`](crate::PushClient::subscribe).
///
/// Holds the decoded per-item state while registered: each update line from
/// the server carries partial field state which is decoded against the
/// cached values and merged, so listeners always see the full state of the
/// item. With [`with_new_values_only`](Self::with_new_values_only) the cache
/// is skipped and listeners see only the raw tokens of each update.
pub struct Subscription {
    mode: Mode,
    items: Vec<String>,
    fields: Vec<String>,
    data_adapter: String,
    snapshot: bool,
    new_values_only: bool,
    listeners: Vec<Listener>,
    last_values: HashMap<usize, HashMap<String, Option<String>>>,
}

impl Subscription {
    /// Create a subscription for the given items and fields.
    ///
    /// Snapshot delivery is requested by default, matching the server's
    /// usual expectation for MERGE tables.
    pub fn new(mode: Mode, items: Vec<String>, fields: Vec<String>) -> Self {
        Self {
            mode,
            items,
            fields,
            data_adapter: String::new(),
            snapshot: true,
            new_values_only: false,
            listeners: Vec::new(),
            last_values: HashMap::new(),
        }
    }

    /// Name the data adapter serving this subscription.
    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.data_adapter = adapter.into();
        self
    }

    /// Ask the server to deliver current state before live updates.
    pub fn with_snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Deliver only the raw tokens present in each update, with no decode
    /// against cached state and no per-item cache kept.
    pub fn with_new_values_only(mut self, on: bool) -> Self {
        self.new_values_only = on;
        self
    }

    /// Register a listener; listeners are invoked synchronously for every
    /// item update, in registration order.
    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: Fn(&ItemUpdate) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn data_adapter(&self) -> &str {
        &self.data_adapter
    }

    pub fn snapshot(&self) -> bool {
        self.snapshot
    }

    pub fn new_values_only(&self) -> bool {
        self.new_values_only
    }

    pub(crate) fn listeners(&self) -> Vec<Listener> {
        self.listeners.clone()
    }

    /// Decode one update line into an [`ItemUpdate`], maintaining the
    /// per-item cache unless the subscription is raw-only.
    pub(crate) fn apply_update(&mut self, item_line: &str) -> ProtocolResult<ItemUpdate> {
        let update = UpdateLine::parse(item_line)?;
        if update.position > self.items.len() {
            return Err(ProtocolError::PositionOutOfRange {
                position: update.position,
                count: self.items.len(),
            });
        }
        if update.tokens.len() > self.fields.len() {
            return Err(ProtocolError::TooManyTokens {
                tokens: update.tokens.len(),
                fields: self.fields.len(),
            });
        }
        let name = self.items[update.position - 1].clone();

        let values = if self.new_values_only {
            // raw pass-through of the tokens actually sent, markers included
            self.fields
                .iter()
                .zip(&update.tokens)
                .filter(|(_, token)| !token.is_empty())
                .map(|(field, token)| (field.clone(), Some(token.clone())))
                .collect()
        } else {
            let cached = self.last_values.entry(update.position).or_default();
            for (field, token) in self.fields.iter().zip(&update.tokens) {
                let prev = cached.get(field).and_then(|v| v.as_deref());
                let decoded = decode_field(token, prev);
                cached.insert(field.clone(), decoded);
            }
            // fields absent from this line keep their cached value
            cached.clone()
        };

        Ok(ItemUpdate {
            position: update.position,
            name,
            values,
        })
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("mode", &self.mode)
            .field("items", &self.items)
            .field("fields", &self.fields)
            .field("data_adapter", &self.data_adapter)
            .field("snapshot", &self.snapshot)
            .field("new_values_only", &self.new_values_only)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge_subscription() -> Subscription {
        Subscription::new(
            Mode::Merge,
            vec!["item1".to_string()],
            vec!["f1".to_string(), "f2".to_string()],
        )
    }

    #[test]
    fn test_partial_updates_merge_into_full_state() {
        let mut sub = merge_subscription();

        let first = sub.apply_update("1|A|").unwrap();
        assert_eq!(first.value("f1"), Some("A"));

        let second = sub.apply_update("1||B").unwrap();
        assert_eq!(second.value("f1"), Some("A"));
        assert_eq!(second.value("f2"), Some("B"));
    }

    #[test]
    fn test_trailing_fields_retain_cached_values() {
        let mut sub = merge_subscription();
        sub.apply_update("1|A|B").unwrap();

        // update with fewer tokens than the schema: f2 keeps "B"
        let update = sub.apply_update("1|C").unwrap();
        assert_eq!(update.value("f1"), Some("C"));
        assert_eq!(update.value("f2"), Some("B"));
    }

    #[test]
    fn test_null_and_empty_markers() {
        let mut sub = merge_subscription();
        sub.apply_update("1|A|B").unwrap();

        let update = sub.apply_update("1|#|$").unwrap();
        assert!(update.is_null("f1"));
        assert_eq!(update.value("f2"), Some(""));
    }

    #[test]
    fn test_new_values_only_passes_raw_tokens() {
        let mut sub = merge_subscription().with_new_values_only(true);

        let update = sub.apply_update("1|A|").unwrap();
        assert_eq!(update.value("f1"), Some("A"));
        assert!(!update.has("f2"));

        // no cache: the next update carries only its own tokens, undecoded
        let update = sub.apply_update("1||#B").unwrap();
        assert!(!update.has("f1"));
        assert_eq!(update.value("f2"), Some("#B"));
    }

    #[test]
    fn test_position_out_of_range() {
        let mut sub = merge_subscription();
        assert!(matches!(
            sub.apply_update("2|A"),
            Err(ProtocolError::PositionOutOfRange { position: 2, count: 1 })
        ));
    }

    #[test]
    fn test_token_overflow() {
        let mut sub = merge_subscription();
        assert!(matches!(
            sub.apply_update("1|A|B|C"),
            Err(ProtocolError::TooManyTokens { tokens: 3, fields: 2 })
        ));
    }

    #[test]
    fn test_items_are_independent() {
        let mut sub = Subscription::new(
            Mode::Merge,
            vec!["a".to_string(), "b".to_string()],
            vec!["f1".to_string()],
        );
        sub.apply_update("1|X").unwrap();
        let update = sub.apply_update("2|").unwrap();
        assert_eq!(update.name, "b");
        // item 2 never saw a value for f1
        assert_eq!(update.value("f1"), None);
    }
}
