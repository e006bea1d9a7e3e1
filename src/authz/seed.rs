//! Idempotent provisioning of the permission catalog, the stock roles, and
//! their grants. Used by the `cli seed` command and by integration tests
//! that need a working role setup before registering users.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::authz::{bypass_role_from_env, permissions, roles, RequiredPermission};
use crate::errors::AppError;
use crate::utils::{hash_password, utc_now};

const REVISOR_GRANTS: &[RequiredPermission] = &[
    permissions::READ_PROGRESS_REPORT,
    permissions::APPROVE_PROGRESS_REPORT,
    permissions::READ_ACTIVITY,
    permissions::READ_INDICATOR,
    permissions::READ_USER,
];

const TECNICO_GRANTS: &[RequiredPermission] = &[
    permissions::CREATE_PROGRESS_REPORT,
    permissions::READ_PROGRESS_REPORT,
    permissions::UPDATE_PROGRESS_REPORT,
    permissions::READ_ACTIVITY,
    permissions::READ_INDICATOR,
];

/// What a seeding pass changed. Every insert is `OR IGNORE`, so a second
/// run over the same database reports zeros.
#[derive(Debug, Default)]
pub struct SeedSummary {
    pub roles_added: u64,
    pub permissions_added: u64,
    pub grants_added: u64,
    pub admin_created: bool,
}

/// Registers the stock roles, every catalog permission, and the role
/// grants. Safe to run against a database that is already provisioned.
pub async fn ensure_catalog(pool: &SqlitePool) -> Result<SeedSummary, AppError> {
    let mut summary = SeedSummary::default();
    let now = utc_now();

    for (name, description) in [
        (
            roles::ADMINISTRADOR,
            "Full access to administration and approvals",
        ),
        (
            roles::REVISOR,
            "Reviews and decides submitted progress reports",
        ),
        (roles::TECNICO, "Captures and submits progress reports"),
    ] {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO roles (id, name, description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        summary.roles_added += result.rows_affected();
    }

    for permission in permissions::CATALOG {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO permissions (id, action, resource, description, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(permission.action)
        .bind(permission.resource)
        .bind(format!(
            "Allows {} on {}",
            permission.action, permission.resource
        ))
        .bind(now)
        .execute(pool)
        .await?;
        summary.permissions_added += result.rows_affected();
    }

    for (role, grants) in [
        (roles::ADMINISTRADOR, permissions::CATALOG),
        (roles::REVISOR, REVISOR_GRANTS),
        (roles::TECNICO, TECNICO_GRANTS),
    ] {
        for grant in grants {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) \
                 SELECT r.id, p.id, ? FROM roles r, permissions p \
                 WHERE r.name = ? AND p.action = ? AND p.resource = ?",
            )
            .bind(now)
            .bind(role)
            .bind(grant.action)
            .bind(grant.resource)
            .execute(pool)
            .await?;
            summary.grants_added += result.rows_affected();
        }
    }

    Ok(summary)
}

/// Creates the initial administrator account in the bypass role. Skipped
/// when `ADMIN_PASSWORD` is unset or the account already exists; the
/// email defaults to `admin@planning.example` (`ADMIN_EMAIL`).
pub async fn ensure_admin_user(pool: &SqlitePool) -> Result<bool, AppError> {
    let Ok(password) = std::env::var("ADMIN_PASSWORD") else {
        tracing::info!("ADMIN_PASSWORD not set, skipping the initial admin user");
        return Ok(false);
    };
    let email =
        std::env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@planning.example".to_string());

    let existing: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(false);
    }

    let bypass_role = bypass_role_from_env();
    let role_id: Option<String> = sqlx::query_scalar("SELECT id FROM roles WHERE name = ?")
        .bind(&bypass_role)
        .fetch_optional(pool)
        .await?;
    let role_id = role_id.ok_or_else(|| {
        AppError::configuration(format!("role {bypass_role:?} is not provisioned"))
    })?;

    let now = utc_now();
    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role_id, department, active, \
         created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind("Administrador del Sistema")
    .bind(&email)
    .bind(hash_password(&password)?)
    .bind(&role_id)
    .bind(Option::<String>::None)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(true)
}

pub async fn run(pool: &SqlitePool) -> Result<SeedSummary, AppError> {
    let mut summary = ensure_catalog(pool).await?;
    summary.admin_created = ensure_admin_user(pool).await?;
    Ok(summary)
}
