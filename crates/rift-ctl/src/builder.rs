//! Fluent builder for creating imposters from test code.
//!
//! ```no_run
//! use rift_ctl::{ConfigClient, ImposterBuilder};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), rift_ctl::ClientError> {
//! let client = ConfigClient::new("localhost", 2525)?;
//! let mut imposter = ImposterBuilder::new(json!({"port": 3003, "protocol": "http"}))
//!     .with_stub()
//!     .matching_request(json!({"equals": {"path": "/under-pressure"}}))
//!     .responding_with(json!({"statusCode": 200, "body": {"ok": true}}))
//!     .build();
//! imposter.create(&client).await?;
//! imposter.destroy(&client).await?;
//! # Ok(())
//! # }
//! ```

use serde_json::{json, Map, Value};

use crate::client::{ClientError, ConfigClient};

/// An imposter definition under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ImposterBuilder {
    config: Map<String, Value>,
    stubs: Vec<Value>,
}

impl ImposterBuilder {
    /// Start from base fields (`port`, `protocol`, `name`, ...). Any `stubs`
    /// in `config` are discarded; add them with `with_stub`.
    pub fn new(config: Value) -> Self {
        let mut config = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        config.remove("stubs");
        Self {
            config,
            stubs: Vec::new(),
        }
    }

    /// Append an empty stub and start filling it in.
    pub fn with_stub(mut self) -> StubBuilder {
        self.stubs.push(json!({"predicates": [], "responses": []}));
        StubBuilder { imposter: self }
    }

    pub fn port(&self) -> Option<u16> {
        self.config
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
    }

    /// The full imposter document.
    pub fn to_json(&self) -> Value {
        let mut config = self.config.clone();
        config.insert("stubs".to_string(), Value::Array(self.stubs.clone()));
        Value::Object(config)
    }

    /// `POST /imposters`. Records the port the server assigned, if any.
    pub async fn create(&mut self, client: &ConfigClient) -> Result<Value, ClientError> {
        let created = client.create(&self.to_json()).await?;
        if let Some(port) = created.get("port").filter(|p| p.is_u64()) {
            self.config.insert("port".to_string(), port.clone());
        }
        Ok(created)
    }

    /// `DELETE /imposters/:port`. `None` when the imposter has no port yet.
    pub async fn destroy(&self, client: &ConfigClient) -> Result<Option<Value>, ClientError> {
        match self.port() {
            Some(port) => client.delete(port).await.map(Some),
            None => Ok(None),
        }
    }

    /// `DELETE /imposters` - removes every imposter on the server, not just
    /// this one.
    pub async fn destroy_all(&self, client: &ConfigClient) -> Result<Value, ClientError> {
        client.delete_all().await
    }
}

/// Builder positioned on the most recently added stub.
#[derive(Debug, Clone, PartialEq)]
pub struct StubBuilder {
    imposter: ImposterBuilder,
}

impl StubBuilder {
    pub fn matching_request(mut self, predicate: Value) -> Self {
        self.push("predicates", predicate);
        self
    }

    /// Add a canned response (`{"is": response}`).
    pub fn responding_with(mut self, response: Value) -> Self {
        self.push("responses", json!({ "is": response }));
        self
    }

    /// Finish this stub and start another.
    pub fn with_stub(self) -> StubBuilder {
        self.imposter.with_stub()
    }

    pub fn build(self) -> ImposterBuilder {
        self.imposter
    }

    pub async fn create(self, client: &ConfigClient) -> Result<ImposterBuilder, ClientError> {
        let mut imposter = self.imposter;
        imposter.create(client).await?;
        Ok(imposter)
    }

    fn push(&mut self, key: &str, value: Value) {
        if let Some(list) = self
            .imposter
            .stubs
            .last_mut()
            .and_then(|stub| stub.get_mut(key))
            .and_then(Value::as_array_mut)
        {
            list.push(value);
        }
    }
}
