//! Ships domain events out of the process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::events::DomainEvent;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Failures are logged; an event that cannot be published never fails the caller.
    async fn publish(&self, event: DomainEvent);

    async fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in events { self.publish(event).await; }
    }
}

#[derive(Debug, Serialize)]
struct EventEnvelope<'a> {
    id: Uuid,
    kind: &'static str,
    occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a DomainEvent,
}

impl<'a> EventEnvelope<'a> {
    fn new(event: &'a DomainEvent) -> Self {
        Self { id: Uuid::now_v7(), kind: event.kind(), occurred_at: Utc::now(), event }
    }
}

/// Used when no broker is configured.
#[derive(Debug, Default, Clone)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: DomainEvent) {
        info!(kind = event.kind(), event = ?event, "Domain event");
    }
}

#[derive(Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
    prefix: String,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self {
        Self { client, prefix: prefix.into() }
    }

    fn subject(&self, event: &DomainEvent) -> String { format!("{}.{}", self.prefix, event.kind()) }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: DomainEvent) {
        let subject = self.subject(&event);
        let payload = match serde_json::to_vec(&EventEnvelope::new(&event)) {
            Ok(payload) => payload,
            Err(e) => { warn!(error = %e, %subject, "Failed to encode event"); return; }
        };
        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            warn!(error = %e, %subject, "Failed to publish event");
        }
    }
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingPublisher(std::sync::Mutex<Vec<DomainEvent>>);

#[cfg(test)]
impl RecordingPublisher {
    pub(crate) fn kinds(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().map(DomainEvent::kind).collect()
    }
}

#[cfg(test)]
#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: DomainEvent) { self.0.lock().unwrap().push(event); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::OrderEvent;

    #[test]
    fn test_envelope_shape() {
        let event = DomainEvent::Order(OrderEvent::Cancelled { order_id: "o1".into(), reason: "changed mind".into() });
        let json = serde_json::to_value(EventEnvelope::new(&event)).unwrap();
        assert_eq!(json["kind"], "order.cancelled");
        assert_eq!(json["aggregate"], "order");
        assert_eq!(json["event"], "cancelled");
        assert_eq!(json["order_id"], "o1");
    }
}
