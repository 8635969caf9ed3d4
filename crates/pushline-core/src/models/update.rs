//! Item update events delivered to subscription listeners

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A decoded update for one item of a subscription.
///
/// `values` maps field names to decoded values; `None` is the protocol's
/// null marker, distinct from the empty string. Depending on the
/// subscription's delivery settings the map is either the full merged state
/// of the item or just the fields present in the triggering update line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    /// 1-based position of the item in the subscription's item list.
    pub position: usize,
    /// Item name at that position.
    pub name: String,
    /// Field name to decoded value.
    pub values: HashMap<String, Option<String>>,
}

impl ItemUpdate {
    /// Get a field's decoded value, flattening absent and null to `None`.
    pub fn value(&self, field: &str) -> Option<&str> {
        self.values.get(field).and_then(|v| v.as_deref())
    }

    /// Whether the field is present in this update (possibly as null).
    pub fn has(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Whether the field is present and explicitly null.
    pub fn is_null(&self, field: &str) -> bool {
        matches!(self.values.get(field), Some(None))
    }

    /// Names of the fields present in this update.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
