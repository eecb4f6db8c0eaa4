//! Broker wire format shared by the outbox relay and the pipeline worker.
//!
//! Every message on the order queues is a UTF-8 JSON [`EventEnvelope`].
//! `event_id` equals the originating outbox row id and is the idempotency
//! key across redeliveries; retry state travels in AMQP headers, never in
//! the body, so the body survives every hop unchanged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain event type emitted by intake for every new order.
pub const ORDER_CREATED: &str = "ORDER_CREATED";

/// Aggregate type carried by order events.
pub const AGGREGATE_ORDER: &str = "order";

/// AMQP header names for the retry envelope.
pub mod headers {
    /// Number of retry hops this message has taken (starts at 0).
    pub const X_RETRIES: &str = "x-retries";
    /// Delay applied on this hop in milliseconds. Informational.
    pub const X_TTL_MS: &str = "x-ttl-ms";
    /// Reason a message was parked, set only on DLQ messages.
    pub const X_DLQ_REASON: &str = "x-dlq-reason";
}

/// Result alias for envelope parsing.
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

/// Errors produced while decoding a broker message body.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// Body is not valid JSON or is missing required fields
    #[error("malformed message body: {0}")]
    Malformed(#[from] serde_json::Error),

    /// `event_id` is present but is not a numeric outbox id
    #[error("event_id is not a numeric outbox id: {0:?}")]
    BadEventId(String),
}

/// Message body published to `order.created` and re-published on every
/// retry/DLQ hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Order this event belongs to
    pub order_id: String,
    /// Originating outbox row id, stringified; the idempotency key
    pub event_id: String,
    /// Aggregate type (always "order" for this pipeline)
    pub aggregate_type: String,
    /// Event payload as stored in the outbox row
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build an envelope for an outbox row.
    pub fn new(
        order_id: impl Into<String>,
        outbox_id: i64,
        aggregate_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            event_id: outbox_id.to_string(),
            aggregate_type: aggregate_type.into(),
            payload,
        }
    }

    /// Decode a broker message body.
    pub fn from_bytes(body: &[u8]) -> EnvelopeResult<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Encode for publishing.
    pub fn to_bytes(&self) -> Vec<u8> {
        // EventEnvelope contains only JSON-representable fields.
        serde_json::to_vec(self).expect("envelope serialization cannot fail")
    }

    /// The outbox id behind `event_id`.
    pub fn event_id_num(&self) -> EnvelopeResult<i64> {
        self.event_id
            .parse::<i64>()
            .map_err(|_| EnvelopeError::BadEventId(self.event_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_round_trip() {
        let envelope = EventEnvelope::new(
            "ORD-1",
            42,
            AGGREGATE_ORDER,
            json!({"order_id": "ORD-1"}),
        );

        let bytes = envelope.to_bytes();
        let decoded = EventEnvelope::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.event_id, "42");
        assert_eq!(decoded.event_id_num().unwrap(), 42);
    }

    #[test]
    fn test_rejects_non_json_body() {
        let err = EventEnvelope::from_bytes(b"not-json").unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));
    }

    #[test]
    fn test_rejects_missing_order_id() {
        let body = json!({"event_id": "1", "aggregate_type": "order", "payload": {}});
        let err = EventEnvelope::from_bytes(&serde_json::to_vec(&body).unwrap()).unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));
    }

    #[test]
    fn test_rejects_non_numeric_event_id() {
        let envelope = EventEnvelope {
            order_id: "ORD-7".to_string(),
            event_id: "not-a-number".to_string(),
            aggregate_type: AGGREGATE_ORDER.to_string(),
            payload: json!({}),
        };

        assert!(matches!(
            envelope.event_id_num().unwrap_err(),
            EnvelopeError::BadEventId(_)
        ));
    }
}
