//! Subscription Manager — registered subscriptions over a watched
//! collection, each with its own subscribers, filter expression, and
//! projected field set.

use std::collections::HashMap;
use std::sync::Arc;

use avaast_query::expr::{evaluate, EvalContext};
use avaast_query::{as_bool, Expression, Row};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;
const RECORD_ALIAS: &str = "record";

/// A registered subscription's static definition.
#[derive(Debug, Clone)]
pub struct SubscriptionDef {
    pub collection: String,
    pub filter_expr: Option<Expression>,
    pub projection_fields: Vec<String>,
}

/// A transport-neutral connection to one subscriber: `send` pushes a frame,
/// and the channel closing (receiver dropped, or this handle dropped) is
/// the close signal consumers observe.
pub struct Subscriber {
    pub id: Uuid,
    pub params: HashMap<String, Value>,
    sender: mpsc::Sender<Value>,
}

impl Subscriber {
    pub async fn send(&self, frame: Value) -> bool {
        self.sender.send(frame).await.is_ok()
    }
}

struct Subscription {
    def: SubscriptionDef,
    subscribers: Vec<Arc<Subscriber>>,
}

/// Owns every registered subscription and fans record-change events out to
/// their subscribers.
pub struct SubscriptionManager {
    subscriptions: RwLock<HashMap<String, Subscription>>,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: String, def: SubscriptionDef) {
        let mut subscriptions = self.subscriptions.write();
        let entry = subscriptions
            .entry(name)
            .or_insert_with(|| Subscription {
                def: def.clone(),
                subscribers: Vec::new(),
            });
        entry.def = def;
    }

    /// Attaches a new subscriber to `subscription_name`, returning the
    /// receiving half of its frame channel. `None` if no subscription by
    /// that name is registered.
    pub fn subscribe(
        &self,
        subscription_name: &str,
        params: HashMap<String, Value>,
    ) -> Option<(Uuid, mpsc::Receiver<Value>)> {
        let mut subscriptions = self.subscriptions.write();
        let subscription = subscriptions.get_mut(subscription_name)?;

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        subscription.subscribers.push(Arc::new(Subscriber {
            id,
            params,
            sender: tx,
        }));
        Some((id, rx))
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.subscriptions.read().keys().cloned().collect()
    }

    /// Called on every record change: iterates the subscriptions registered
    /// against `collection`, evaluates each subscriber's filter against the
    /// record merged with its own parameters, and sends a projected
    /// notification frame to every subscriber whose filter passes (or who
    /// has none). Subscribers whose send fails (connection closed) are
    /// dropped from the registry.
    pub async fn notify(&self, collection: &str, record: &Value) {
        let targets: Vec<(String, SubscriptionDef, Vec<Arc<Subscriber>>)> = {
            let subscriptions = self.subscriptions.read();
            subscriptions
                .iter()
                .filter(|(_, sub)| sub.def.collection == collection)
                .map(|(name, sub)| (name.clone(), sub.def.clone(), sub.subscribers.clone()))
                .collect()
        };

        for (name, def, subscribers) in targets {
            let mut dead = Vec::new();
            for subscriber in &subscribers {
                let passes = match &def.filter_expr {
                    Some(expr) => evaluates_truthy(expr, record, &subscriber.params),
                    None => true,
                };
                if !passes {
                    continue;
                }

                let projected = project(record, &def.projection_fields);
                let frame = serde_json::json!({
                    "type": "subscription",
                    "subscription": name,
                    "data": projected,
                    "timestamp": Utc::now().to_rfc3339(),
                });
                if !subscriber.send(frame).await {
                    dead.push(subscriber.id);
                }
            }

            if !dead.is_empty() {
                let mut subscriptions = self.subscriptions.write();
                if let Some(sub) = subscriptions.get_mut(&name) {
                    sub.subscribers.retain(|s| !dead.contains(&s.id));
                }
            }
        }
    }
}

fn evaluates_truthy(expr: &Expression, record: &Value, params: &HashMap<String, Value>) -> bool {
    let mut row: Row = Row::new();
    if let Value::Object(map) = record {
        for (key, value) in map {
            row.insert(format!("{RECORD_ALIAS}.{key}"), value.clone());
        }
    }
    let ctx = EvalContext::new(&row).with_params(params);
    match evaluate(expr, &ctx) {
        Ok(value) => as_bool(value),
        Err(_) => false,
    }
}

fn project(record: &Value, fields: &[String]) -> Value {
    if fields.is_empty() {
        return record.clone();
    }
    let mut out = serde_json::Map::with_capacity(fields.len());
    for field in fields {
        let mut current = record;
        for segment in field.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => {
                    current = &Value::Null;
                    break;
                }
            }
        }
        out.insert(field.clone(), current.clone());
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use avaast_query::ComparisonOp;

    fn def(collection: &str, filter: Option<Expression>, fields: &[&str]) -> SubscriptionDef {
        SubscriptionDef {
            collection: collection.to_string(),
            filter_expr: filter,
            projection_fields: fields.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn unfiltered_subscriber_receives_every_change() {
        let manager = SubscriptionManager::new();
        manager.register("pirateFeed".into(), def("chat.pirate.avast", None, &["text"]));
        let (_id, mut rx) = manager.subscribe("pirateFeed", HashMap::new()).unwrap();

        manager
            .notify("chat.pirate.avast", &serde_json::json!({"text": "land ho"}))
            .await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["subscription"], "pirateFeed");
        assert_eq!(frame["data"]["text"], "land ho");
    }

    #[tokio::test]
    async fn filter_expression_gates_delivery() {
        let manager = SubscriptionManager::new();
        let filter = Expression::Comparison {
            op: ComparisonOp::Eq,
            left: Box::new(Expression::field(RECORD_ALIAS, "severity")),
            right: Some(Box::new(Expression::string("high"))),
        };
        manager.register("alerts".into(), def("app.alerts", Some(filter), &[]));
        let (_id, mut rx) = manager.subscribe("alerts", HashMap::new()).unwrap();

        manager
            .notify("app.alerts", &serde_json::json!({"severity": "low"}))
            .await;
        manager
            .notify("app.alerts", &serde_json::json!({"severity": "high"}))
            .await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["data"]["severity"], "high");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_receiver_drops_subscriber_on_next_notify() {
        let manager = SubscriptionManager::new();
        manager.register("feed".into(), def("chat.pirate.avast", None, &[]));
        let (_id, rx) = manager.subscribe("feed", HashMap::new()).unwrap();
        drop(rx);

        manager
            .notify("chat.pirate.avast", &serde_json::json!({"text": "gone"}))
            .await;

        let (_id2, mut rx2) = manager.subscribe("feed", HashMap::new()).unwrap();
        manager
            .notify("chat.pirate.avast", &serde_json::json!({"text": "still here"}))
            .await;
        let frame = rx2.recv().await.unwrap();
        assert_eq!(frame["data"]["text"], "still here");
    }
}
