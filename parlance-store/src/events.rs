//! Typed payloads carried on the work queues.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use parlance_core::{
    CallId, EntityIdType, EventId, JobKind, MediaEventKind, PhoneNumber, QueueError, QueueName,
    Timestamp,
};

/// Envelope wrapping every queue payload with its event identity.
///
/// The fingerprint derived from the event id is what consumers record on
/// the Call to drop duplicate deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEnvelope<T> {
    pub event_id: EventId,
    pub body: T,
}

impl<T: Serialize + DeserializeOwned> QueueEnvelope<T> {
    pub fn new(body: T) -> Self {
        Self {
            event_id: EventId::new_v4(),
            body,
        }
    }

    /// Idempotency fingerprint for this delivery.
    pub fn fingerprint(&self) -> String {
        format!("evt:{}", self.event_id)
    }

    pub fn to_json(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Transient {
            reason: format!("encode: {e}"),
        })
    }

    pub fn from_json(queue: QueueName, payload: &str) -> Result<Self, QueueError> {
        serde_json::from_str(payload).map_err(|e| QueueError::MalformedPayload {
            queue,
            reason: e.to_string(),
        })
    }
}

/// Events on the `call_events` queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A new call reached the gateway (or an outbound dial was requested).
    IncomingCall {
        caller_phone: PhoneNumber,
        callee_phone: PhoneNumber,
        correlation_id: String,
    },
    /// Media lifecycle change on an established call.
    MediaEvent {
        call_id: CallId,
        kind: MediaEventKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
}

/// Events on the `sms_events` queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsEvent {
    pub from: PhoneNumber,
    pub to: PhoneNumber,
    pub body: String,
    pub received_at: Timestamp,
}

/// Jobs on the `post_call` and `training` queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub call_id: CallId,
    pub kind: JobKind,
}
