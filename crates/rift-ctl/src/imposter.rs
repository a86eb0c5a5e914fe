//! The imposters document exchanged with the server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ "imposters": [...] }`.
///
/// Each imposter is kept as raw JSON: its shape belongs to the server, the
/// controller only moves it between file, wire and memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImposterSet {
    pub imposters: Vec<Value>,
}

impl ImposterSet {
    pub fn new(imposters: Vec<Value>) -> Self {
        Self { imposters }
    }

    /// Normalize a parsed config document.
    ///
    /// A document with a top-level `imposters` array is taken as is. Anything
    /// else is treated as a single bare imposter and wrapped in a one-element
    /// list.
    pub fn from_document(document: Value) -> Self {
        let bare = match document {
            Value::Object(mut map) => match map.remove("imposters") {
                Some(Value::Array(imposters)) => return Self { imposters },
                Some(other) => {
                    map.insert("imposters".to_string(), other);
                    Value::Object(map)
                }
                None => Value::Object(map),
            },
            other => other,
        };
        Self {
            imposters: vec![bare],
        }
    }

    pub fn len(&self) -> usize {
        self.imposters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.imposters.is_empty()
    }

    /// Ports of imposters that declare one.
    pub fn ports(&self) -> Vec<u16> {
        self.imposters
            .iter()
            .filter_map(|i| i.get("port").and_then(Value::as_u64))
            .filter_map(|p| u16::try_from(p).ok())
            .collect()
    }
}
