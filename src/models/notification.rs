use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::parse_uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    #[schema(example = "important")]
    pub severity: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbNotification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub severity: String,
    pub read: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbNotification> for Notification {
    type Error = AppError;

    fn try_from(db: DbNotification) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: parse_uuid(&db.id)?,
            user_id: parse_uuid(&db.user_id)?,
            title: db.title,
            message: db.message,
            severity: db.severity,
            read: db.read != 0,
            created_at: db.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct NotificationListQuery {
    pub unread: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UnreadCountResponse {
    pub unread: i64,
}
