//! The unified event shape emitted by every transport, and the fixed set of
//! collections the Watcher pays attention to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The mutation kind a record underwent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOp {
    Create,
    Update,
    Delete,
}

/// A single observed record mutation, already filtered to the Watcher's
/// authority and watched collections.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub op: EventOp,
    pub collection: String,
    pub record_key: String,
    pub authority_id: String,
    pub content_hash: Option<String>,
    pub body: Option<Value>,
}

/// The short collection names under the `app.avaast.*` namespace watched by
/// default.
pub const BASE_WATCHED_COLLECTIONS: &[&str] = &[
    "computed",
    "function",
    "searchIndex",
    "subscription",
    "deploy",
    "appView",
];

pub const NAMESPACE: &str = "app.avaast";

/// Qualifies a short collection name (`"deploy"`) into its fully qualified
/// form (`"app.avaast.deploy"`).
pub fn qualify_collection(short_name: &str) -> String {
    format!("{NAMESPACE}.{short_name}")
}

/// Builds the default watched-collection set, unioned with any
/// application-supplied extras (already fully qualified).
pub fn default_watched_collections(
    extras: impl IntoIterator<Item = String>,
) -> std::collections::HashSet<String> {
    let mut set: std::collections::HashSet<String> = BASE_WATCHED_COLLECTIONS
        .iter()
        .map(|short| qualify_collection(short))
        .collect();
    set.extend(extras);
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifies_under_namespace() {
        assert_eq!(qualify_collection("deploy"), "app.avaast.deploy");
    }

    #[test]
    fn default_set_includes_extras() {
        let set = default_watched_collections(vec!["app.custom.thing".to_string()]);
        assert!(set.contains("app.avaast.deploy"));
        assert!(set.contains("app.custom.thing"));
        assert_eq!(set.len(), BASE_WATCHED_COLLECTIONS.len() + 1);
    }
}
