// JSON implementation of the Serializer port, backed by serde_json.

use crate::core::ports::{Serializer, SerializerError};
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializerError> {
        serde_json::to_vec(value).map_err(SerializerError::Serialize)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializerError> {
        serde_json::from_slice(bytes).map_err(SerializerError::Deserialize)
    }
}

#[cfg(test)]
mod json_serializer_tests {
    use super::*;
    use crate::core::commit::{EventMessage, Headers};
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn it_should_restore_headers_as_a_mapping() {
        let serializer = JsonSerializer::new();
        let mut headers = Headers::new();
        headers.insert("Serializer".to_string(), json!("JsonSerializer"));
        let bytes = serializer.serialize(&headers).unwrap();
        let restored = serializer.deserialize_mapping(&bytes).unwrap();
        assert_eq!(restored.get("Serializer"), Some(&json!("JsonSerializer")));
    }

    #[rstest]
    fn it_should_restore_events_as_a_sequence() {
        let serializer = JsonSerializer::new();
        let events = vec![
            EventMessage::new(json!({ "type": "AccountCreated", "amount": 1000.0 })),
            EventMessage::new(json!({ "type": "FundsTransferred", "amount": -100.0 }))
                .with_header("origin", json!("teller")),
        ];
        let bytes = serializer.serialize(&events).unwrap();
        let restored: Vec<EventMessage> = serializer.deserialize_sequence(&bytes).unwrap();
        assert_eq!(restored, events);
    }

    #[rstest]
    fn it_should_fail_on_malformed_bytes() {
        let serializer = JsonSerializer::new();
        let result = serializer.deserialize_mapping(b"not json");
        assert!(matches!(result, Err(SerializerError::Deserialize(_))));
    }
}
