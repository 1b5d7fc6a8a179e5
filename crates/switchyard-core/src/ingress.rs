//! Normalization of incoming task requests.
//!
//! Callers submit work in a handful of shapes (`intent` or `action`, `payload` or
//! `data`, a nested `entity` or flat `entity_type`/`entity_id`). All of them are
//! folded into one [`TaskRequest`] here, so nothing downstream inspects raw JSON
//! for alternate field names.

use crate::{SwitchyardError, SwitchyardResult};
use serde::{Deserialize, Serialize};

/// The business entity a request concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity type, e.g. `"deal"` or `"account"`.
    pub kind: String,
    /// Entity id, normalized to a string.
    pub id: String,
}

/// A normalized request to start a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// What the caller wants done. Also the fallback route key.
    pub intent: String,
    /// The entity the request concerns, if any.
    #[serde(default)]
    pub entity: Option<EntityRef>,
    /// Request data handed to the planner.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Route label that takes precedence over the intent.
    #[serde(default)]
    pub pipeline: Option<String>,
    /// Role or agent id of whoever asked for the work.
    #[serde(default)]
    pub requested_by: Option<String>,
}

#[derive(Deserialize)]
struct RawEntity {
    #[serde(alias = "type", alias = "entity_type")]
    kind: String,
    #[serde(alias = "entity_id")]
    id: serde_json::Value,
}

#[derive(Deserialize)]
struct RawRequest {
    #[serde(alias = "action", alias = "task")]
    intent: Option<String>,
    entity: Option<RawEntity>,
    #[serde(alias = "type")]
    entity_type: Option<String>,
    entity_id: Option<serde_json::Value>,
    #[serde(alias = "data")]
    payload: Option<serde_json::Value>,
    #[serde(alias = "pipeline_tag")]
    pipeline: Option<String>,
    #[serde(alias = "from", alias = "requester")]
    requested_by: Option<String>,
}

/// Entity ids arrive as strings or numbers.
fn id_to_string(value: serde_json::Value) -> SwitchyardResult<String> {
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(SwitchyardError::Config(format!(
            "entity id must be a string or number, got {other}"
        ))),
    }
}

impl TaskRequest {
    /// A request with no entity, pipeline or requester.
    pub fn new(intent: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            intent: intent.into(),
            entity: None,
            payload,
            pipeline: None,
            requested_by: None,
        }
    }

    /// Attach the entity the request concerns.
    pub fn with_entity(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.entity = Some(EntityRef {
            kind: kind.into(),
            id: id.into(),
        });
        self
    }

    /// Plan by the named route instead of the intent.
    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    /// Record who asked for the work.
    pub fn requested_by(mut self, who: impl Into<String>) -> Self {
        self.requested_by = Some(who.into());
        self
    }

    /// Normalize a raw JSON request.
    ///
    /// A missing intent is rejected. When no payload is given the remaining
    /// unrecognized fields are not carried over; the payload is simply `{}`.
    pub fn from_value(value: serde_json::Value) -> SwitchyardResult<Self> {
        let raw: RawRequest = serde_json::from_value(value)?;
        let intent = raw
            .intent
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SwitchyardError::Config("task request has no intent".into()))?;

        let entity = match (raw.entity, raw.entity_type, raw.entity_id) {
            (Some(nested), _, _) => Some(EntityRef {
                kind: nested.kind,
                id: id_to_string(nested.id)?,
            }),
            (None, Some(kind), Some(id)) => Some(EntityRef {
                kind,
                id: id_to_string(id)?,
            }),
            (None, Some(kind), None) => {
                return Err(SwitchyardError::Config(format!(
                    "entity type '{kind}' given without an entity id"
                )))
            }
            (None, None, _) => None,
        };

        Ok(Self {
            intent,
            entity,
            payload: raw
                .payload
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            pipeline: raw.pipeline,
            requested_by: raw.requested_by,
        })
    }

    /// The payload handed to planning: the request payload with the entity merged in
    /// under `"entity"` when the payload is an object.
    pub fn planning_payload(&self) -> serde_json::Value {
        let mut payload = self.payload.clone();
        if let (Some(entity), serde_json::Value::Object(map)) = (&self.entity, &mut payload) {
            map.entry("entity").or_insert_with(|| {
                serde_json::json!({ "kind": entity.kind, "id": entity.id })
            });
        }
        payload
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_shape() {
        let req = TaskRequest::from_value(json!({
            "intent": "price_quote",
            "entity": {"kind": "deal", "id": "D-7"},
            "payload": {"sku": "A-1"},
            "pipeline": "sales"
        }))
        .unwrap();
        assert_eq!(req.intent, "price_quote");
        assert_eq!(
            req.entity,
            Some(EntityRef {
                kind: "deal".into(),
                id: "D-7".into()
            })
        );
        assert_eq!(req.payload, json!({"sku": "A-1"}));
        assert_eq!(req.pipeline.as_deref(), Some("sales"));
    }

    #[test]
    fn test_alternate_field_names() {
        let req = TaskRequest::from_value(json!({
            "action": "price_quote",
            "type": "deal",
            "entity_id": 42,
            "data": {"sku": "B-2"},
            "from": "sales"
        }))
        .unwrap();
        assert_eq!(req.intent, "price_quote");
        assert_eq!(req.entity.as_ref().unwrap().kind, "deal");
        assert_eq!(req.entity.as_ref().unwrap().id, "42");
        assert_eq!(req.payload, json!({"sku": "B-2"}));
        assert_eq!(req.requested_by.as_deref(), Some("sales"));
    }

    #[test]
    fn test_missing_intent_rejected() {
        let err = TaskRequest::from_value(json!({"payload": {}})).unwrap_err();
        assert!(matches!(err, SwitchyardError::Config(_)));
        let blank = TaskRequest::from_value(json!({"intent": "  "}));
        assert!(blank.is_err());
    }

    #[test]
    fn test_entity_type_without_id_rejected() {
        let result = TaskRequest::from_value(json!({"intent": "x", "entity_type": "deal"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_payload_defaults_to_empty_object() {
        let req = TaskRequest::from_value(json!({"task": "research"})).unwrap();
        assert_eq!(req.payload, json!({}));
        assert!(req.entity.is_none());
    }

    #[test]
    fn test_planning_payload_merges_entity() {
        let req = TaskRequest::new("quote", json!({"sku": "A"})).with_entity("deal", "9");
        let payload = req.planning_payload();
        assert_eq!(payload["entity"]["id"], "9");
        assert_eq!(payload["sku"], "A");
    }
}
