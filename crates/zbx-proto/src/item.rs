//! Item records pushed through the sender protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A metric value as carried in the JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

/// One monitored value for a host/key pair.
///
/// `clock` is unix seconds and `ns` the sub-second part; both are left out of
/// the payload when absent so the server stamps the value on arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawItem")]
pub struct ItemValue {
    host: String,
    key: String,
    value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    clock: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ns: Option<i32>,
}

#[derive(Deserialize)]
struct RawItem {
    host: String,
    key: String,
    value: Value,
    #[serde(default, alias = "timestamp")]
    clock: Option<i64>,
    #[serde(default)]
    ns: Option<i32>,
}

impl TryFrom<RawItem> for ItemValue {
    type Error = Error;

    fn try_from(raw: RawItem) -> Result<Self> {
        let item = Self::new(raw.host, raw.key, raw.value)?;
        match (raw.clock, raw.ns) {
            (None, None) => Ok(item),
            (Some(clock), None) => Ok(item.with_clock(clock)),
            (Some(clock), Some(ns)) => item.with_clock(clock).with_ns(ns),
            (None, Some(_)) => Err(Error::config("ns given without clock")),
        }
    }
}

impl ItemValue {
    /// # Errors
    ///
    /// Returns `Error::Config` if `host` or `key` is empty.
    pub fn new(
        host: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let host = host.into();
        let key = key.into();

        if host.is_empty() {
            return Err(Error::config("item host must not be empty"));
        }
        if key.is_empty() {
            return Err(Error::config("item key must not be empty"));
        }

        let value = value.into();
        if let Value::Float(n) = &value
            && !n.is_finite()
        {
            return Err(Error::config(format!("item value must be finite, got {n}")));
        }

        Ok(Self {
            host,
            key,
            value,
            clock: None,
            ns: None,
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: i64) -> Self {
        self.clock = Some(clock);
        self
    }

    /// # Errors
    ///
    /// Returns `Error::Config` if no clock is set or `ns` is outside `0..1e9`.
    pub fn with_ns(mut self, ns: i32) -> Result<Self> {
        if self.clock.is_none() {
            return Err(Error::config("ns requires a clock"));
        }
        if !(0..1_000_000_000).contains(&ns) {
            return Err(Error::config(format!("ns out of range: {ns}")));
        }
        self.ns = Some(ns);
        Ok(self)
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn clock(&self) -> Option<i64> {
        self.clock
    }

    #[must_use]
    pub fn ns(&self) -> Option<i32> {
        self.ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_rejects_empty_host_and_key() {
        assert!(matches!(
            ItemValue::new("", "agent.ping", 1_i64),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ItemValue::new("web-01", "", 1_i64),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_new_rejects_non_finite_floats() {
        for n in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                ItemValue::new("web-01", "cpu.load", n),
                Err(Error::Config(_))
            ));
        }

        let item = ItemValue::new("web-01", "cpu.load", -0.5_f64).unwrap();
        let json = serde_json::to_string(&item).unwrap();
        assert!(!json.contains("null"));
    }

    #[test]
    fn test_ns_requires_clock() {
        let item = ItemValue::new("web-01", "cpu.load", 0.5_f64).unwrap();
        assert!(item.clone().with_ns(10).is_err());

        let item = item.with_clock(1_695_713_666).with_ns(30).unwrap();
        assert_eq!(item.clock(), Some(1_695_713_666));
        assert_eq!(item.ns(), Some(30));
    }

    #[test]
    fn test_ns_out_of_range() {
        let item = ItemValue::new("h", "k", "v").unwrap().with_clock(1);
        assert!(item.clone().with_ns(-1).is_err());
        assert!(item.with_ns(1_000_000_000).is_err());
    }

    #[test]
    fn test_serialize_omits_absent_fields() {
        let item = ItemValue::new("web-01", "net.if.in", 1024_i64).unwrap();
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(
            json,
            json!({"host": "web-01", "key": "net.if.in", "value": 1024})
        );
        assert!(json.get("clock").is_none());
        assert!(json.get("ns").is_none());
    }

    #[test]
    fn test_serialize_native_scalars() {
        let float = ItemValue::new("h", "k", 1.5_f64).unwrap();
        let text = ItemValue::new("h", "k", "up").unwrap();

        assert_eq!(serde_json::to_value(&float).unwrap()["value"], json!(1.5));
        assert_eq!(serde_json::to_value(&text).unwrap()["value"], json!("up"));
    }

    #[test]
    fn test_serialize_with_clock_and_ns() {
        let item = ItemValue::new("h", "k", 1_i64)
            .unwrap()
            .with_clock(1_700_000_000)
            .with_ns(5)
            .unwrap();
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["clock"], json!(1_700_000_000));
        assert_eq!(json["ns"], json!(5));
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: ItemValue =
            serde_json::from_value(json!({"host": "h", "key": "k", "value": "v", "timestamp": 10}))
                .unwrap();
        assert_eq!(ok.clock(), Some(10));

        let bad = serde_json::from_value::<ItemValue>(json!({"host": "", "key": "k", "value": 1}));
        assert!(bad.is_err());

        let bad = serde_json::from_value::<ItemValue>(json!({"host": "h", "key": "k", "value": 1, "ns": 4}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from(42_i64).to_string(), "42");
        assert_eq!(Value::from("ok").to_string(), "ok");
        assert_eq!(Value::from(0.25_f64).to_string(), "0.25");
    }
}
