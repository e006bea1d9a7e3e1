//! Reportable targets of the planning hierarchy. Only the leaves a progress
//! report can attach to are modeled; the axes/objectives/products levels of
//! the full plan live outside this service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::Loggable;
use crate::models::user::parse_uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Activity {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Activity {
    fn entity_type() -> &'static str {
        "activity"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbActivity {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbActivity> for Activity {
    type Error = AppError;

    fn try_from(db: DbActivity) -> Result<Self, Self::Error> {
        Ok(Activity {
            id: parse_uuid(&db.id)?,
            name: db.name,
            description: db.description,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ActivityCreateRequest {
    #[schema(example = "Metropolitan reforestation campaign")]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Indicator {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurement_unit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Indicator {
    fn entity_type() -> &'static str {
        "indicator"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbIndicator {
    pub id: String,
    pub name: String,
    pub measurement_unit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbIndicator> for Indicator {
    type Error = AppError;

    fn try_from(db: DbIndicator) -> Result<Self, Self::Error> {
        Ok(Indicator {
            id: parse_uuid(&db.id)?,
            name: db.name,
            measurement_unit: db.measurement_unit,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IndicatorCreateRequest {
    #[schema(example = "Hectares reforested")]
    pub name: String,
    #[schema(example = "ha")]
    pub measurement_unit: Option<String>,
}
