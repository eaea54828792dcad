//! Inbound message body.

use serde::{Deserialize, Deserializer};

use crate::constants::action_types;

/// Action request carried in a queue message body. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueuePayload {
    #[serde(deserialize_with = "null_as_default")]
    pub action: String,
    pub action_type: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub request_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub discard_script_response: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub entity: Entity,
    #[serde(deserialize_with = "null_as_default")]
    pub mapped_action: MappedActionRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Entity {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub entity_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MappedActionRef {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
}

/// Explicit `null` reads as the zero value, same as a missing key
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl QueuePayload {
    /// The mapped action name wins over the plain action name
    pub fn action_name(&self) -> Option<&str> {
        [self.mapped_action.name.as_str(), self.action.as_str()]
            .into_iter()
            .find(|name| !name.is_empty())
    }

    /// Requested action type, `custom` when the request does not say
    pub fn requested_type(&self) -> &str {
        match self.action_type.as_deref() {
            Some(action_type) if !action_type.is_empty() => action_type,
            _ => action_types::CUSTOM,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_action_name_takes_precedence() {
        let payload: QueuePayload = serde_json::from_str(
            r#"{"action":"Create","mappedAction":{"name":"CreateIssue"},"entity":{"id":"e-1","type":"alert"}}"#,
        )
        .unwrap();
        assert_eq!(payload.action_name(), Some("CreateIssue"));
        assert_eq!(payload.entity.entity_type, "alert");
    }

    #[test]
    fn test_missing_action_and_type_defaults() {
        let payload: QueuePayload =
            serde_json::from_str(r#"{"requestId":"r-1","extra":true}"#).unwrap();
        assert_eq!(payload.action_name(), None);
        assert_eq!(payload.requested_type(), "custom");
        assert!(!payload.discard_script_response);
    }

    #[test]
    fn test_null_optional_fields_read_as_defaults() {
        let bodies = [
            r#"{"action":"Create","mappedAction":null}"#,
            r#"{"action":"Create","entity":null}"#,
            r#"{"action":"Create","requestId":null}"#,
            r#"{"action":"Create","discardScriptResponse":null}"#,
            r#"{"action":"Create","actionType":null}"#,
            r#"{"action":"Create","entity":{"id":null,"type":null},"mappedAction":{"name":null}}"#,
        ];
        for body in bodies {
            let payload: QueuePayload = serde_json::from_str(body).unwrap();
            assert_eq!(payload.action_name(), Some("Create"), "{body}");
            assert_eq!(payload.requested_type(), "custom");
            assert_eq!(payload.request_id, "");
            assert!(!payload.discard_script_response);
            assert_eq!(payload.entity, Entity::default());
        }

        let payload: QueuePayload = serde_json::from_str(r#"{"action":null}"#).unwrap();
        assert_eq!(payload.action_name(), None);
    }
}
