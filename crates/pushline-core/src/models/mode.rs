//! Subscription delivery modes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Delivery discipline of a subscription.
///
/// The mode is forwarded to the server with the ADD control request and
/// selects the server-side delivery semantics; the client-side decode rule
/// is the same for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Incremental merged state per item.
    Merge,
    /// Each update delivered independently.
    Distinct,
    /// No server-side processing.
    Raw,
    /// Ordered add/update/delete semantics.
    Command,
}

impl Mode {
    /// Wire name used in control requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Merge => "MERGE",
            Mode::Distinct => "DISTINCT",
            Mode::Raw => "RAW",
            Mode::Command => "COMMAND",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MERGE" => Ok(Mode::Merge),
            "DISTINCT" => Ok(Mode::Distinct),
            "RAW" => Ok(Mode::Raw),
            "COMMAND" => Ok(Mode::Command),
            other => Err(format!("unknown subscription mode: {other}")),
        }
    }
}
