use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};
use crate::models::user::parse_uuid;

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Role {
    fn entity_type() -> &'static str {
        "role"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbRole {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbRole> for Role {
    type Error = AppError;

    fn try_from(db: DbRole) -> Result<Self, Self::Error> {
        Ok(Role {
            id: parse_uuid(&db.id)?,
            name: db.name,
            description: db.description,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "Revisor")]
    pub name: String,
    #[schema(example = "Reviews and decides submitted progress reports")]
    pub description: Option<String>,
}

// =============================================================================
// PERMISSION CATALOG
// =============================================================================

/// A catalog entry. The `(action, resource)` pair is the identity; the id is
/// only a storage handle for grants to reference.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    #[schema(example = "approve")]
    pub action: String,
    #[schema(example = "progress-report")]
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Loggable for Permission {
    fn entity_type() -> &'static str {
        "permission"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbPermission {
    pub id: String,
    pub action: String,
    pub resource: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbPermission> for Permission {
    type Error = AppError;

    fn try_from(db: DbPermission) -> Result<Self, Self::Error> {
        Ok(Permission {
            id: parse_uuid(&db.id)?,
            action: db.action,
            resource: db.resource,
            description: db.description,
            created_at: db.created_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCreateRequest {
    #[schema(example = "approve")]
    pub action: String,
    #[schema(example = "progress-report")]
    pub resource: String,
    #[schema(example = "Decide submitted progress reports")]
    pub description: Option<String>,
}

// =============================================================================
// ROLE-PERMISSION GRANT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Loggable for RolePermission {
    fn entity_type() -> &'static str {
        "role_permission"
    }
    fn subject_id(&self) -> Uuid {
        self.role_id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignPermissionToRoleRequest {
    pub permission_id: Uuid,
}

// =============================================================================
// USER-ROLE ASSIGNMENT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRole {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Loggable for UserRole {
    fn entity_type() -> &'static str {
        "user_role"
    }
    fn subject_id(&self) -> Uuid {
        self.user_id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
}

// =============================================================================
// EFFECTIVE PERMISSIONS (computed)
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    pub role: String,
    /// Granted permission keys, `action:resource`, sorted
    pub permissions: Vec<String>,
    /// True when the role is the configured bypass role and checks are skipped
    pub bypass: bool,
}
