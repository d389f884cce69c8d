use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;
use vantage_core::{Finding, Flow};

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// One event handed to `broadcast` — `{event_type, data}` per §4.10. The
/// five event types the core emits: `http_flow`, `finding`,
/// `client_connected`, `client_disconnected`, `tls_handshake_failed`.
#[derive(Debug, Clone, Serialize)]
pub struct LiveEvent {
    pub event_type: &'static str,
    pub data: serde_json::Value,
}

impl LiveEvent {
    pub fn http_flow(flow: &Flow) -> Self {
        Self {
            event_type: "http_flow",
            data: json!({
                "id": flow.id,
                "session_id": flow.session_id,
                "method": flow.method,
                "url": flow.url,
                "status": flow.response_status,
                "auth_kind": flow.auth_kind,
                "duration_ms": flow.duration_ms,
                "timestamp": flow.timestamp,
            }),
        }
    }

    pub fn finding(finding: &Finding) -> Self {
        Self {
            event_type: "finding",
            data: serde_json::to_value(finding).unwrap_or_else(|_| json!({})),
        }
    }

    pub fn client_connected(client_addr: &str) -> Self {
        Self {
            event_type: "client_connected",
            data: json!({ "client_addr": client_addr }),
        }
    }

    pub fn client_disconnected(client_addr: &str) -> Self {
        Self {
            event_type: "client_disconnected",
            data: json!({ "client_addr": client_addr }),
        }
    }

    pub fn tls_handshake_failed(client_addr: &str, reason: &str) -> Self {
        Self {
            event_type: "tls_handshake_failed",
            data: json!({ "client_addr": client_addr, "reason": reason }),
        }
    }
}

pub type SubscriberHandle = Uuid;

struct Subscriber {
    sender: mpsc::Sender<LiveEvent>,
}

/// Authenticated broadcast to connected subscribers, with per-subscriber
/// drop-on-send-failure (§4.10). In-order delivery per subscriber falls out
/// of each subscriber owning a single bounded channel; ordering between
/// subscribers is not guaranteed, matching the spec.
pub struct LiveEventBus {
    subscribers: DashMap<SubscriberHandle, Subscriber>,
    valid_tokens: Vec<String>,
}

impl LiveEventBus {
    pub fn new(valid_tokens: Vec<String>) -> Self {
        Self {
            subscribers: DashMap::new(),
            valid_tokens,
        }
    }

    /// Authenticate `token` before accepting the subscription. On success,
    /// returns a handle and the receiving half of its channel; on failure,
    /// returns `None` — the caller closes the connection with a
    /// policy-violation reason (§4.10).
    pub fn subscribe(&self, token: &str) -> Option<(SubscriberHandle, mpsc::Receiver<LiveEvent>)> {
        if !self.valid_tokens.iter().any(|t| t == token) {
            warn!("live event bus rejected subscription: invalid token");
            return None;
        }

        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let handle = Uuid::new_v4();
        self.subscribers.insert(handle, Subscriber { sender: tx });
        info!(%handle, "live event bus subscriber connected");
        Some((handle, rx))
    }

    pub fn unsubscribe(&self, handle: SubscriberHandle) {
        self.subscribers.remove(&handle);
    }

    /// Deliver `event` to every subscriber. A send failure removes that
    /// subscriber and broadcast continues to the rest (§4.10).
    pub fn broadcast(&self, event: LiveEvent) {
        let dead: Vec<SubscriberHandle> = self
            .subscribers
            .iter()
            .filter_map(|entry| {
                if entry.value().sender.try_send(event.clone()).is_err() {
                    Some(*entry.key())
                } else {
                    None
                }
            })
            .collect();

        for handle in dead {
            self.subscribers.remove(&handle);
        }
    }

    pub async fn publish_flow(&self, flow: &Flow) {
        self.broadcast(LiveEvent::http_flow(flow));
    }

    pub async fn publish_finding(&self, finding: &Finding) {
        self.broadcast(LiveEvent::finding(finding));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for LiveEventBus {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_rejects_an_unknown_token() {
        let bus = LiveEventBus::new(vec!["good-token".into()]);
        assert!(bus.subscribe("bad-token").is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribe_accepts_a_valid_token_and_receives_broadcasts() {
        let bus = LiveEventBus::new(vec!["good-token".into()]);
        let (_handle, mut rx) = bus.subscribe("good-token").unwrap();

        bus.broadcast(LiveEvent::client_connected("10.0.0.1:1234"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "client_connected");
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_subscriber() {
        let bus = LiveEventBus::new(vec!["good-token".into()]);
        let (handle, _rx) = bus.subscribe("good-token").unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        bus.unsubscribe(handle);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn a_dropped_receiver_is_pruned_on_next_broadcast() {
        let bus = LiveEventBus::new(vec!["good-token".into()]);
        let (_handle, rx) = bus.subscribe("good-token").unwrap();
        drop(rx);

        bus.broadcast(LiveEvent::client_connected("10.0.0.1:1234"));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
