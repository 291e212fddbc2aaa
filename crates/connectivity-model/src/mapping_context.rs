use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Configuration of one payload mapper instance, referenced from a route's
/// `payloadMapping` by its `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingContext {
    pub id: String,
    pub mapping_engine: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl MappingContext {
    pub fn new(id: impl Into<String>, mapping_engine: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mapping_engine: mapping_engine.into(),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}
