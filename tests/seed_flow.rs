//! Seeding: the `cli seed` command calls `seed::run`, which must be safe
//! to repeat and must only create the initial admin when told to.

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::tempdir;
use tower::util::ServiceExt; // for `oneshot`

use poa_tracker::authz::seed;
use poa_tracker::create_app;

async fn fresh_pool() -> Result<(SqlitePool, tempfile::TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");
    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;
    Ok((pool, dir))
}

#[tokio::test]
async fn catalog_seeding_is_idempotent() -> Result<()> {
    let (pool, _dir) = fresh_pool().await?;

    let first = seed::ensure_catalog(&pool).await?;
    assert_eq!(first.roles_added, 3);
    assert_eq!(first.permissions_added, 17);
    // Administrador holds the whole catalog, the other two roles five each
    assert_eq!(first.grants_added, 17 + 5 + 5);

    let second = seed::ensure_catalog(&pool).await?;
    assert_eq!(second.roles_added, 0);
    assert_eq!(second.permissions_added, 0);
    assert_eq!(second.grants_added, 0);

    let role_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles")
        .fetch_one(&pool)
        .await?;
    assert_eq!(role_count, 3);

    Ok(())
}

#[tokio::test]
async fn admin_account_is_created_only_on_request() -> Result<()> {
    let (pool, _dir) = fresh_pool().await?;
    std::env::remove_var("ADMIN_PASSWORD");
    std::env::remove_var("ADMIN_EMAIL");

    // without ADMIN_PASSWORD the seeder provisions no account
    let summary = seed::run(&pool).await?;
    assert!(!summary.admin_created);
    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&pool)
        .await?;
    assert_eq!(users, 0);

    // with it, exactly one bypass-role admin appears
    std::env::set_var("ADMIN_PASSWORD", "seed-password-1");
    let created = seed::ensure_admin_user(&pool).await?;
    assert!(created);
    let created_again = seed::ensure_admin_user(&pool).await?;
    assert!(!created_again, "existing account must not be recreated");

    let (name, role_name): (String, String) = sqlx::query_as(
        "SELECT u.name, r.name FROM users u INNER JOIN roles r ON r.id = u.role_id \
         WHERE u.email = 'admin@planning.example'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(name, "Administrador del Sistema");
    assert_eq!(role_name, "Administrador");

    // and the account can actually log in through the API
    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;
    let login_body = json!({
        "email": "admin@planning.example",
        "password": "seed-password-1"
    });
    let req = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header("content-type", "application/json")
        .body(Body::from(login_body.to_string()))?;

    let resp: Response = app.oneshot(req).await?;
    let status = resp.status();
    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    if status != StatusCode::OK {
        panic!(
            "admin login failed: {} - {}",
            status,
            String::from_utf8_lossy(&body_bytes)
        );
    }
    let auth_res: serde_json::Value = serde_json::from_slice(&body_bytes)?;
    assert!(auth_res.get("token").and_then(|v| v.as_str()).is_some());
    assert_eq!(
        auth_res.pointer("/user/name").and_then(|v| v.as_str()),
        Some("Administrador del Sistema")
    );

    Ok(())
}
