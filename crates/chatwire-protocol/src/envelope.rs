//! Fan-out envelope carried on the shared pub/sub topic.
//!
//! An envelope pairs a target user with an already-serialized outbound
//! event. Every process receives every envelope and delivers it only if it
//! holds that user's connection.

use crate::events::UserId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Default topic shared by all processes.
pub const DEFAULT_TOPIC: &str = "chat:messages";

/// A message addressed to one user, in transit between processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Target user.
    pub user_id: UserId,
    /// Serialized outbound event, base64 on the wire.
    #[serde(with = "base64_payload")]
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(user_id: UserId, payload: impl Into<Bytes>) -> Self {
        Self {
            user_id,
            payload: payload.into(),
        }
    }
}

mod base64_payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_payload_is_base64() {
        let envelope = Envelope::new(42, b"{\"type\":\"typing\"}".to_vec());
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["user_id"], 42);
        assert_eq!(value["payload"], "eyJ0eXBlIjoidHlwaW5nIn0=");
    }

    #[test]
    fn test_envelope_rejects_bad_payload() {
        let raw = r#"{"user_id":1,"payload":"not base64!"}"#;
        assert!(serde_json::from_str::<Envelope>(raw).is_err());
    }
}
