use bson::{oid::ObjectId, Document};
use serde::{Deserialize, Serialize};

use crate::{
    collection,
    util::{now, FormattedDateTime, ObjectIdString},
};

/// Kinds of documents that audit entries, notifications and reports point at.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Order,
    Offer,
    Report,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuditLogModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub actor_id: Option<ObjectId>,
    pub action: String,
    pub entity: EntityKind,
    pub entity_id: Option<ObjectId>,
    #[serde(default)]
    pub details: Document,
    pub created_at: bson::DateTime,
}

collection!(AuditLogCollection, AuditLogModel);

impl AuditLogCollection {
    /// Appends an entry. Audit failures never fail the action being audited.
    pub async fn record(
        &self,
        actor_id: Option<ObjectId>,
        action: &str,
        entity: EntityKind,
        entity_id: Option<ObjectId>,
        details: Document,
    ) {
        let entry = AuditLogModel {
            id: ObjectId::new(),
            actor_id,
            action: action.to_string(),
            entity,
            entity_id,
            details,
            created_at: now(),
        };

        tracing::debug!(action, ?entity, ?entity_id, "audit");
        if let Err(err) = self.insert_one(&entry, None).await {
            tracing::warn!(action, "failed to write audit log: {}", err);
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuditLogResponse {
    pub id: ObjectIdString,
    pub actor_id: Option<ObjectIdString>,
    pub action: String,
    pub entity: EntityKind,
    pub entity_id: Option<ObjectIdString>,
    pub details: serde_json::Value,
    pub created_at: FormattedDateTime,
}

impl From<AuditLogModel> for AuditLogResponse {
    fn from(value: AuditLogModel) -> Self {
        Self {
            id: value.id.into(),
            actor_id: value.actor_id.map(Into::into),
            action: value.action,
            entity: value.entity,
            entity_id: value.entity_id.map(Into::into),
            details: bson::Bson::Document(value.details).into_relaxed_extjson(),
            created_at: value.created_at.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_renders_details_as_plain_json() {
        let model = AuditLogModel {
            id: ObjectId::new(),
            actor_id: None,
            action: "order.create".to_string(),
            entity: EntityKind::Order,
            entity_id: Some(ObjectId::new()),
            details: bson::doc! { "parts": 2, "status": "new" },
            created_at: bson::DateTime::now(),
        };

        let response = AuditLogResponse::from(model);
        assert_eq!(response.details["parts"], 2);
        assert_eq!(response.details["status"], "new");

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["entity"], "order");
        assert!(json["actor_id"].is_null());
    }
}
