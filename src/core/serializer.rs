//! Container serializer.
//!
//! Containers are encoded as JSON objects carrying an extra
//! `__container_type__` member so bytes read back under the wrong type are
//! detected instead of silently producing a default-filled record.

use crate::core::containers::AttributeContainer;
use crate::core::error::{StorageError, StorageResult};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

const CONTAINER_TYPE_MEMBER: &str = "__container_type__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    #[default]
    Json,
}

impl SerializationFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SerializationFormat::Json => "json",
        }
    }

    pub fn serialize<T: AttributeContainer>(&self, container: &T) -> StorageResult<Vec<u8>> {
        match self {
            SerializationFormat::Json => serialize_json(container),
        }
    }

    pub fn deserialize<T: AttributeContainer>(&self, data: &[u8]) -> StorageResult<T> {
        match self {
            SerializationFormat::Json => deserialize_json(data),
        }
    }
}

impl fmt::Display for SerializationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SerializationFormat {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(SerializationFormat::Json),
            other => Err(StorageError::IncompatibleFormat(format!(
                "unsupported serialization format: {}",
                other
            ))),
        }
    }
}

fn serialize_json<T: AttributeContainer>(container: &T) -> StorageResult<Vec<u8>> {
    let mut value = serde_json::to_value(container)
        .map_err(|e| StorageError::serialization(T::CONTAINER_TYPE, e))?;
    let JsonValue::Object(members) = &mut value else {
        return Err(StorageError::serialization(
            T::CONTAINER_TYPE,
            "container did not serialize to a JSON object",
        ));
    };
    members.insert(
        CONTAINER_TYPE_MEMBER.to_string(),
        JsonValue::String(T::CONTAINER_TYPE.to_string()),
    );
    serde_json::to_vec(&value).map_err(|e| StorageError::serialization(T::CONTAINER_TYPE, e))
}

fn deserialize_json<T: AttributeContainer>(data: &[u8]) -> StorageResult<T> {
    let mut value: JsonValue = serde_json::from_slice(data)
        .map_err(|e| StorageError::serialization(T::CONTAINER_TYPE, e))?;
    let JsonValue::Object(members) = &mut value else {
        return Err(StorageError::serialization(
            T::CONTAINER_TYPE,
            "serialized container is not a JSON object",
        ));
    };
    match members.remove(CONTAINER_TYPE_MEMBER) {
        Some(JsonValue::String(tag)) if tag == T::CONTAINER_TYPE => {}
        Some(other) => {
            return Err(StorageError::serialization(
                T::CONTAINER_TYPE,
                format!("container type mismatch: found {}", other),
            ));
        }
        None => {
            return Err(StorageError::serialization(
                T::CONTAINER_TYPE,
                "missing container type tag",
            ));
        }
    }
    serde_json::from_value(value).map_err(|e| StorageError::serialization(T::CONTAINER_TYPE, e))
}
