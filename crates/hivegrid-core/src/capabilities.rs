//! Capability maps — the requested-session attributes and the templates
//! (stereotypes) nodes advertise as servable.
//!
//! Capabilities are an opaque mapping of string keys to JSON values with a
//! distinguished `browserName` key. They are treated as immutable once
//! built; construction goes through [`Capabilities::with`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The capability key consulted by the rarity prefilter.
pub const BROWSER_NAME: &str = "browserName";

/// An opaque, ordered capability map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeMap<String, Value>);

impl Capabilities {
    /// An empty capability set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy with the given entry set.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Shorthand for a set containing only `browserName`.
    pub fn browser(name: &str) -> Self {
        Self::new().with(BROWSER_NAME, name)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `browserName` entry, or `""` when absent or non-string.
    pub fn browser_name(&self) -> &str {
        self.0
            .get(BROWSER_NAME)
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Whether a node advertising `stereotype` can serve this request.
    ///
    /// Every requested entry must be present in the stereotype with an
    /// equal value. Null or empty-string requested values act as
    /// wildcards.
    pub fn satisfied_by(&self, stereotype: &Capabilities) -> bool {
        self.0.iter().all(|(key, requested)| {
            if requested.is_null() || requested.as_str() == Some("") {
                return true;
            }
            stereotype.0.get(key) == Some(requested)
        })
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

impl FromIterator<(String, Value)> for Capabilities {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
