use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::parse_uuid;

/// One row of the `activity_log` projection.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActivityLogEntry {
    pub id: Uuid,
    #[schema(example = "report.approved")]
    pub event_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    /// Full event payload as published on the bus (old/new state, context)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub properties: Option<Value>,
    #[schema(example = "critical")]
    pub severity: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbActivityLogEntry {
    pub id: String,
    pub event_name: String,
    pub description: String,
    pub actor_id: Option<String>,
    pub subject_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub properties: Option<String>,
    pub severity: String,
}

impl TryFrom<DbActivityLogEntry> for ActivityLogEntry {
    type Error = AppError;

    fn try_from(db: DbActivityLogEntry) -> Result<Self, Self::Error> {
        Ok(ActivityLogEntry {
            id: parse_uuid(&db.id)?,
            event_name: db.event_name,
            description: db.description,
            actor_id: db.actor_id.as_deref().map(parse_uuid).transpose()?,
            subject_id: db.subject_id.as_deref().map(parse_uuid).transpose()?,
            occurred_at: db.occurred_at,
            // rows written before a payload-shape change still list fine
            properties: db.properties.as_deref().and_then(|raw| serde_json::from_str(raw).ok()),
            severity: db.severity,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivityLogQuery {
    pub event: Option<String>,
    pub severity: Option<String>,
    pub limit: Option<i64>,
}
