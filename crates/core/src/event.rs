//! The event record exchanged through the bus

use crate::id::EventId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An immutable, uniquely identified fact appended to the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Event {
    /// Create an event without payload
    pub fn new(id: impl Into<EventId>, event_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            data: None,
        }
    }

    /// Create an event with a freshly generated id
    pub fn generate(event_type: impl Into<String>) -> Self {
        Self::new(EventId::generate(), event_type)
    }

    /// Attach a structured payload
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Advisory payload sent on the wake channel: `<id>:<type>`
    pub fn wake_payload(&self) -> String {
        format!("{}:{}", self.id, self.event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_json_uses_type_field() {
        let event = Event::new("a1", "order_created").with_data(json!({"qty": 2}));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["id"], "a1");
        assert_eq!(json["type"], "order_created");
        assert_eq!(json["data"]["qty"], 2);
    }

    #[test]
    fn test_event_without_data_omits_field() {
        let event = Event::new("a1", "t");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("data"));

        let parsed: Event = serde_json::from_str(r#"{"id":"a1","type":"t"}"#).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_wake_payload() {
        assert_eq!(Event::new("a1", "t").wake_payload(), "a1:t");
    }
}
