use std::collections::HashSet;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppError;
use crate::jwt::AuthUser;

/// The authenticated caller with role and permission set materialized.
///
/// Built once per request by the extractor; everything the evaluator needs
/// is cached here so authorization itself never goes back to the database.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub name: String,
    pub role_id: Uuid,
    pub role_name: String,
    pub department: Option<String>,
    permissions: HashSet<String>,
}

impl Principal {
    pub fn new(
        user_id: Uuid,
        name: impl Into<String>,
        role_id: Uuid,
        role_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            name: name.into(),
            role_id,
            role_name: role_name.into(),
            department: None,
            permissions: HashSet::new(),
        }
    }

    pub fn with_department(mut self, department: Option<String>) -> Self {
        self.department = department;
        self
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = String>) -> Self {
        self.permissions = perms.into_iter().collect();
        self
    }

    /// Whether the caller's role grants the `action:resource` key.
    pub fn has_permission(&self, key: &str) -> bool {
        self.permissions.contains(key)
    }

    /// Held permission keys, sorted for stable error payloads.
    pub fn held_permissions(&self) -> Vec<String> {
        let mut held: Vec<String> = self.permissions.iter().cloned().collect();
        held.sort();
        held
    }
}

#[derive(Debug, FromRow)]
struct PrincipalRow {
    id: String,
    name: String,
    department: Option<String>,
    active: i64,
    role_id: String,
    role_name: String,
}

/// Load a user's identity, role and granted permission keys.
///
/// Token validity alone is not enough to act: the account must still exist
/// and be active at request time.
pub async fn load_principal(pool: &SqlitePool, user_id: Uuid) -> Result<Principal, AppError> {
    let row = sqlx::query_as::<_, PrincipalRow>(
        "SELECT u.id, u.name, u.department, u.active, u.role_id, r.name AS role_name \
         FROM users u JOIN roles r ON r.id = u.role_id \
         WHERE u.id = ?",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::unauthorized("user no longer exists"))?;

    if row.active == 0 {
        return Err(AppError::unauthorized("user account is deactivated"));
    }

    let keys: Vec<String> = sqlx::query_scalar(
        "SELECT p.action || ':' || p.resource \
         FROM role_permissions rp JOIN permissions p ON p.id = rp.permission_id \
         WHERE rp.role_id = ?",
    )
    .bind(&row.role_id)
    .fetch_all(pool)
    .await?;

    let id = Uuid::parse_str(&row.id)
        .map_err(|e| AppError::internal(format!("invalid user id in database: {e}")))?;
    let role_id = Uuid::parse_str(&row.role_id)
        .map_err(|e| AppError::internal(format!("invalid role id in database: {e}")))?;

    Ok(Principal::new(id, row.name, role_id, row.role_name)
        .with_department(row.department)
        .with_permissions(keys))
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser { user_id } = AuthUser::from_request_parts(parts, state).await?;
        load_principal(&state.pool, user_id).await
    }
}
