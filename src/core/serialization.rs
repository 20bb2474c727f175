use super::error::{CoreError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes a value to bytes using JSON.
///
/// Work-type payloads and events are stored as JSON so that rows stay
/// readable from a plain SQL shell.
///
/// # Errors
/// Returns `CoreError::Serialization` if the value cannot be serialized.
pub fn serialize_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(CoreError::Serialization)
}

/// Deserializes bytes to a value using JSON.
///
/// Value objects re-run their validation while decoding, so a tampered
/// payload surfaces here instead of reaching a handler.
///
/// # Errors
/// Returns `CoreError::Deserialization` if the bytes cannot be deserialized.
pub fn deserialize_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(CoreError::Deserialization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GovernmentId, WorkType};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    #[test]
    fn test_work_type_survives_storage_encoding() {
        let turn_date = Utc.with_ymd_and_hms(2031, 4, 2, 0, 0, 0).unwrap();
        let work_type = WorkType::dominion_turn(Uuid::new_v4(), turn_date).unwrap();

        let bytes = serialize_value(&work_type).unwrap();
        let decoded: WorkType = deserialize_value(&bytes).unwrap();
        assert_eq!(decoded, work_type);
    }

    #[test]
    fn test_nil_identifier_rejected_on_decode() {
        let bytes = serialize_value(&Uuid::nil()).unwrap();
        let decoded: Result<GovernmentId> = deserialize_value(&bytes);
        assert!(matches!(decoded, Err(CoreError::Deserialization(_))));
    }
}
