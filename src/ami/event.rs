//! Normalized AMI event objects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One administrative event as a flat JSON object.
///
/// The `event` field names the event type (`Dial`, `Hangup`, ...). Field
/// order is preserved so traces read like the wire packets they came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AmiEvent(Map<String, Value>);

impl AmiEvent {
    /// Create an event of type `name` with no other fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("event".to_string(), Value::String(name.into()));
        Self(fields)
    }

    /// Add a field, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Wrap a JSON value. Returns `None` unless it is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    /// The declared event type, as sent.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.get("event").and_then(Value::as_str)
    }

    /// The bus key for this event: its type, lowercased.
    #[must_use]
    pub fn key(&self) -> Option<String> {
        self.name().map(str::to_lowercase)
    }

    /// Look up a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// All fields.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for AmiEvent {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_name_and_key() {
        let event = AmiEvent::new("DialBegin").with("channel", "PJSIP/alice-0001");
        assert_eq!(event.name(), Some("DialBegin"));
        assert_eq!(event.key().as_deref(), Some("dialbegin"));
        assert_eq!(event.get("channel"), Some(&json!("PJSIP/alice-0001")));
    }

    #[test]
    fn test_from_value_requires_object() {
        assert!(AmiEvent::from_value(json!(["event", "Dial"])).is_none());
        let event = AmiEvent::from_value(json!({"event": "Hangup", "cause": "16"})).unwrap();
        assert_eq!(event.name(), Some("Hangup"));
    }

    #[test]
    fn test_missing_event_field() {
        let event = AmiEvent::from_value(json!({"response": "Success"})).unwrap();
        assert_eq!(event.name(), None);
        assert_eq!(event.key(), None);
    }

    #[test]
    fn test_serializes_transparently() {
        let event = AmiEvent::new("Dial").with("uniqueid", "1.1");
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"event":"Dial","uniqueid":"1.1"}"#
        );
    }
}
