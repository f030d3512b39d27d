//! Per-step telemetry relay.
//!
//! After each agent step the model output is flattened into a plain JSON
//! structure and posted to `{relay_base}/{session_id}/log`. Delivery is
//! best-effort and fire-and-forget: telemetry loss must never affect task
//! execution, so failures are logged and swallowed.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Relay failure. Recovered locally inside [`RelayClient::on_step`]; this
/// type never crosses the module boundary on the step-completion path.
#[derive(Debug, Error)]
pub enum RelayDeliveryError {
    #[error("relay post failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("relay endpoint answered {0}")]
    Status(u16),
}

/// Model-output value as seen by the relay.
///
/// Scalars pass through, sequences and mappings recurse, and anything
/// outside those shapes is captured through the lossy [`StepValue::opaque`]
/// fallback, since the substructure of agent-internal types is an external,
/// evolving contract.
#[derive(Debug, Clone, PartialEq)]
pub enum StepValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<StepValue>),
    Map(Vec<(String, StepValue)>),
    /// Best-effort string form of an opaque agent-internal value.
    Opaque(String),
}

impl StepValue {
    /// Capture a value with no structured mapping. The result is always a
    /// non-empty string; an empty rendering falls back to the type name.
    pub fn opaque<T: fmt::Debug>(value: &T) -> Self {
        let rendered = format!("{value:?}");
        if rendered.is_empty() {
            StepValue::Opaque(std::any::type_name::<T>().to_string())
        } else {
            StepValue::Opaque(rendered)
        }
    }

    /// Flatten into plain JSON per the relay contract.
    pub fn to_json(&self) -> Value {
        match self {
            StepValue::Null => Value::Null,
            StepValue::Bool(b) => Value::Bool(*b),
            StepValue::Integer(i) => Value::from(*i),
            StepValue::Float(f) => {
                serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null)
            }
            StepValue::Text(s) => Value::String(s.clone()),
            StepValue::List(items) => Value::Array(items.iter().map(StepValue::to_json).collect()),
            StepValue::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.to_json());
                }
                Value::Object(map)
            }
            StepValue::Opaque(s) => Value::String(s.clone()),
        }
    }
}

impl From<Value> for StepValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => StepValue::Null,
            Value::Bool(b) => StepValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    StepValue::Integer(i)
                } else {
                    StepValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => StepValue::Text(s),
            Value::Array(items) => StepValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                StepValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// One serialized step, posted to exactly one per-session endpoint.
#[derive(Debug, Serialize)]
pub struct StepRecord {
    pub session_id: String,
    pub step: usize,
    pub output: Value,
}

/// Posts step records to the per-session relay endpoint.
#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn log_url(&self, session_id: &str) -> String {
        format!("{}/{session_id}/log", self.base_url.trim_end_matches('/'))
    }

    /// Relay one step, fire-and-forget. Never fails, never blocks the step
    /// path beyond spawning the delivery task.
    pub fn on_step(&self, session_id: &str, step_index: usize, output: &StepValue) {
        let record = StepRecord {
            session_id: session_id.to_string(),
            step: step_index,
            output: output.to_json(),
        };
        let client = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            match client.deliver(&record).await {
                Ok(()) => {
                    debug!(target = "wf.relay", session = %session_id, step = record.step, "step relayed");
                }
                Err(e) => {
                    warn!(target = "wf.relay", session = %session_id, step = record.step, error = %e, "step relay failed");
                }
            }
        });
    }

    /// Awaitable delivery of one record. Split out from [`Self::on_step`]
    /// so failure handling stays observable in tests.
    pub async fn deliver(&self, record: &StepRecord) -> Result<(), RelayDeliveryError> {
        let response = self
            .http
            .post(self.log_url(&record.session_id))
            .json(record)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RelayDeliveryError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_and_containers_round_trip() {
        let value = StepValue::Map(vec![
            (
                "current_state".into(),
                StepValue::Map(vec![(
                    "next_goal".into(),
                    StepValue::Text("Connect wallet".into()),
                )]),
            ),
            (
                "action".into(),
                StepValue::List(vec![
                    StepValue::Map(vec![("done".into(), StepValue::Bool(true))]),
                    StepValue::Integer(3),
                    StepValue::Float(0.5),
                    StepValue::Null,
                ]),
            ),
        ]);

        let expected = json!({
            "current_state": {"next_goal": "Connect wallet"},
            "action": [{"done": true}, 3, 0.5, null],
        });
        assert_eq!(value.to_json(), expected);

        // And back through the JSON-derived form.
        let round: StepValue = expected.clone().into();
        assert_eq!(round.to_json(), expected);
    }

    #[test]
    fn opaque_fallback_is_non_empty_string() {
        struct Planner;
        impl fmt::Debug for Planner {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "Planner {{ model: gpt }}")
            }
        }

        let json = StepValue::opaque(&Planner).to_json();
        assert_eq!(json, json!("Planner { model: gpt }"));

        struct Silent;
        impl fmt::Debug for Silent {
            fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
                Ok(())
            }
        }
        let json = StepValue::opaque(&Silent).to_json();
        let text = json.as_str().unwrap();
        assert!(!text.is_empty());
    }

    #[test]
    fn log_url_shape() {
        let relay = RelayClient::new("http://localhost:3000/relayer/");
        assert_eq!(
            relay.log_url("s1"),
            "http://localhost:3000/relayer/s1/log"
        );
    }
}
