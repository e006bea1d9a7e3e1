//! RBAC Admin API Routes
//!
//! Endpoints for managing roles, the permission catalog, and user role
//! assignment. Every mutation here is permission-gated and logged to the
//! activity log with Critical severity.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, put},
    Router,
};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{permissions, Permission as PermissionPair, Principal};
use crate::errors::AppError;
use crate::events::{log_activity_with_context, RequestContext};
use crate::extract::Json;
use crate::models::rbac::{
    AssignPermissionToRoleRequest, AssignRoleRequest, DbPermission, DbRole, EffectivePermissions,
    Permission, PermissionCreateRequest, Role, RoleCreateRequest, RolePermission, UserRole,
};
use crate::models::user::{DbUser, User};
use crate::utils::utc_now;

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        // Roles
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:role_id", get(get_role).delete(delete_role))
        .route(
            "/roles/:role_id/permissions",
            get(get_role_permissions).post(assign_permission_to_role),
        )
        .route(
            "/roles/:role_id/permissions/:permission_id",
            axum::routing::delete(delete_permission_from_role),
        )
        // Permission catalog
        .route("/permissions", get(list_permissions).post(create_permission))
        // A user holds exactly one role, so assignment is a PUT
        .route("/users/:user_id/role", put(assign_role_to_user))
        .route(
            "/users/:user_id/effective-permissions",
            get(get_effective_permissions),
        )
}

// =============================================================================
// ROLE ENDPOINTS
// =============================================================================

/// List all roles
#[utoipa::path(
    get,
    path = "/rbac/roles",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of roles", body = Vec<Role>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<Role>>, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::READ_ROLE)
        .into_result()?;

    let rows = sqlx::query_as::<_, DbRole>(
        "SELECT id, name, description, created_at, updated_at FROM roles ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    let roles: Vec<Role> = rows
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_, _>>()?;

    Ok(Json(roles))
}

/// Create a new role
#[utoipa::path(
    post,
    path = "/rbac/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Json(req): Json<RoleCreateRequest>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::CREATE_ROLE)
        .into_result()?;

    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("role name must not be empty"));
    }

    let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE name = ?")
        .bind(&name)
        .fetch_one(&state.pool)
        .await?;
    if taken > 0 {
        return Err(AppError::conflict(format!("role {name:?} already exists")));
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO roles (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&name)
    .bind(&req.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let role = Role {
        id,
        name,
        description: req.description,
        created_at: now,
        updated_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(principal.user_id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(role)))
}

/// Get a role by ID
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 200, description = "Role details", body = Role),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    principal: Principal,
    Path(role_id): Path<Uuid>,
) -> Result<Json<Role>, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::READ_ROLE)
        .into_result()?;

    let role = fetch_role(&state.pool, role_id).await?;
    Ok(Json(role))
}

/// Delete a role. Fails while users still hold it.
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Role is still assigned to users"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::DELETE_ROLE)
        .into_result()?;

    let role = fetch_role(&state.pool, role_id).await?;

    let holders: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE role_id = ?")
        .bind(role_id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if holders > 0 {
        return Err(AppError::conflict(format!(
            "role {:?} is still assigned to {} user(s)",
            role.name, holders
        )));
    }

    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(principal.user_id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Grant a catalog permission to a role
#[utoipa::path(
    post,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    request_body = AssignPermissionToRoleRequest,
    responses(
        (status = 201, description = "Permission granted"),
        (status = 404, description = "Role or permission not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_permission_to_role(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    Json(req): Json<AssignPermissionToRoleRequest>,
) -> Result<StatusCode, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::UPDATE_ROLE)
        .into_result()?;

    fetch_role(&state.pool, role_id).await?;

    // Grants may only reference pairs that exist in the catalog.
    let known: Option<i64> = sqlx::query_scalar("SELECT 1 FROM permissions WHERE id = ?")
        .bind(req.permission_id.to_string())
        .fetch_optional(&state.pool)
        .await?;
    if known.is_none() {
        return Err(AppError::not_found("Permission not found in the catalog"));
    }

    let now = utc_now();

    sqlx::query(
        "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(role_id.to_string())
    .bind(req.permission_id.to_string())
    .bind(now)
    .execute(&state.pool)
    .await?;

    let assignment = RolePermission {
        role_id,
        permission_id: req.permission_id,
        created_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "assigned",
        Some(principal.user_id),
        &assignment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::CREATED)
}

/// Get permissions granted to a role
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 200, description = "List of granted permissions", body = Vec<Permission>),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role_permissions(
    State(state): State<AppState>,
    principal: Principal,
    Path(role_id): Path<Uuid>,
) -> Result<Json<Vec<Permission>>, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::READ_ROLE)
        .into_result()?;

    fetch_role(&state.pool, role_id).await?;

    let rows = sqlx::query_as::<_, DbPermission>(
        r#"
        SELECT p.id, p.action, p.resource, p.description, p.created_at
        FROM permissions p
        INNER JOIN role_permissions rp ON p.id = rp.permission_id
        WHERE rp.role_id = ?
        ORDER BY p.action, p.resource
        "#,
    )
    .bind(role_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let granted: Vec<Permission> = rows
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_, _>>()?;

    Ok(Json(granted))
}

/// Revoke a permission from a role
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    responses(
        (status = 204, description = "Permission revoked from role"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_permission_from_role(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path((role_id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::UPDATE_ROLE)
        .into_result()?;

    let now = utc_now();

    sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .execute(&state.pool)
        .await?;

    let assignment = RolePermission {
        role_id,
        permission_id,
        created_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "revoked",
        Some(principal.user_id),
        &assignment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// PERMISSION CATALOG ENDPOINTS
// =============================================================================

/// List the permission catalog
#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "RBAC",
    responses(
        (status = 200, description = "Permission catalog", body = Vec<Permission>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<Permission>>, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::READ_PERMISSION)
        .into_result()?;

    let rows = sqlx::query_as::<_, DbPermission>(
        "SELECT id, action, resource, description, created_at FROM permissions \
         ORDER BY action, resource",
    )
    .fetch_all(&state.pool)
    .await?;

    let catalog: Vec<Permission> = rows
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_, _>>()?;

    Ok(Json(catalog))
}

/// Register a new permission pair in the catalog.
///
/// The pair is normalized before storage (lowercased, trimmed, underscores
/// folded to hyphens), so `CREATE:progress_report` and
/// `create:progress-report` are the same permission.
#[utoipa::path(
    post,
    path = "/rbac/permissions",
    tag = "RBAC",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission registered", body = Permission),
        (status = 400, description = "Invalid action or resource"),
        (status = 409, description = "Pair already registered"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Json(req): Json<PermissionCreateRequest>,
) -> Result<(StatusCode, Json<Permission>), AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::CREATE_PERMISSION)
        .into_result()?;

    let pair = PermissionPair::parse(&req.action, &req.resource)?;

    let taken: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM permissions WHERE action = ? AND resource = ?")
            .bind(pair.action())
            .bind(pair.resource())
            .fetch_one(&state.pool)
            .await?;
    if taken > 0 {
        return Err(AppError::conflict(format!(
            "permission {pair} is already registered"
        )));
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO permissions (id, action, resource, description, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(pair.action())
    .bind(pair.resource())
    .bind(&req.description)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let permission = Permission {
        id,
        action: pair.action().to_string(),
        resource: pair.resource().to_string(),
        description: req.description,
        created_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(principal.user_id),
        &permission,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(permission)))
}

// =============================================================================
// USER ROLE ASSIGNMENT
// =============================================================================

/// Replace a user's role
#[utoipa::path(
    put,
    path = "/rbac/users/{user_id}/role",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    request_body = AssignRoleRequest,
    responses(
        (status = 200, description = "Role assigned", body = User),
        (status = 404, description = "User or role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_role_to_user(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<Json<User>, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::UPDATE_USER)
        .into_result()?;

    fetch_role(&state.pool, req.role_id).await?;

    let now = utc_now();
    let updated = sqlx::query("UPDATE users SET role_id = ?, updated_at = ? WHERE id = ?")
        .bind(req.role_id.to_string())
        .bind(now)
        .bind(user_id.to_string())
        .execute(&state.pool)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::not_found("User not found"));
    }

    let user: User = sqlx::query_as::<_, DbUser>(
        "SELECT id, name, email, password_hash, role_id, department, active, created_at, \
         updated_at FROM users WHERE id = ?",
    )
    .bind(user_id.to_string())
    .fetch_one(&state.pool)
    .await?
    .try_into()?;

    let assignment = UserRole {
        user_id,
        role_id: req.role_id,
        created_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "assigned",
        Some(principal.user_id),
        &assignment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(user))
}

// =============================================================================
// EFFECTIVE PERMISSIONS
// =============================================================================

/// Effective permissions a user's role currently grants
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/effective-permissions",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "Effective permissions", body = EffectivePermissions),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_effective_permissions(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
) -> Result<Json<EffectivePermissions>, AppError> {
    state
        .evaluator
        .authorize(&principal, permissions::READ_USER)
        .into_result()?;

    let target = sqlx::query_as::<_, DbUser>(
        "SELECT id, name, email, password_hash, role_id, department, active, created_at, \
         updated_at FROM users WHERE id = ?",
    )
    .bind(user_id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("User not found"))?;

    let role_name: String = sqlx::query_scalar("SELECT name FROM roles WHERE id = ?")
        .bind(&target.role_id)
        .fetch_one(&state.pool)
        .await?;

    let keys: Vec<String> = sqlx::query_scalar(
        "SELECT p.action || ':' || p.resource FROM role_permissions rp \
         INNER JOIN permissions p ON p.id = rp.permission_id \
         INNER JOIN users u ON u.role_id = rp.role_id \
         WHERE u.id = ? ORDER BY 1",
    )
    .bind(user_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let target_principal = Principal::new(
        user_id,
        target.name.clone(),
        crate::models::user::parse_uuid(&target.role_id)?,
        role_name.clone(),
    );

    Ok(Json(EffectivePermissions {
        user_id,
        role: role_name,
        permissions: keys,
        bypass: state.evaluator.is_bypass(&target_principal),
    }))
}

// =============================================================================
// HELPERS
// =============================================================================

async fn fetch_role(pool: &SqlitePool, role_id: Uuid) -> Result<Role, AppError> {
    sqlx::query_as::<_, DbRole>(
        "SELECT id, name, description, created_at, updated_at FROM roles WHERE id = ?",
    )
    .bind(role_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Role not found"))?
    .try_into()
}
