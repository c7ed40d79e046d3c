//! Serialization protocol for on-disk checkpoints

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Protocol for serializing and deserializing checkpoint records
///
/// Implementations provide the byte encoding used by [`FileCheckpointSaver`](crate::FileCheckpointSaver).
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;

    /// File extension used for records written with this protocol
    fn extension(&self) -> &'static str;
}

/// JSON-based serializer (default)
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}

/// Binary serializer using bincode
///
/// The workflow state is a `serde_json::Value`, which bincode cannot decode
/// directly, so the state is stored as its JSON string inside the record.
#[derive(Debug, Clone, Default)]
pub struct BincodeSerializer;

impl BincodeSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for BincodeSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let json = serde_json::to_string(value)?;
        Ok(bincode::serialize(&json)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        let json: String = bincode::deserialize(data)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn extension(&self) -> &'static str {
        "bin"
    }
}
