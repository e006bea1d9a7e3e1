//! RBAC surface: seeded catalog, role management, grants, assignment,
//! and the effective-permissions readout.

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

use poa_tracker::authz::seed;
use poa_tracker::create_app;

struct TestApp {
    app: Router,
    pool: SqlitePool,
    _dir: TempDir,
}

async fn setup() -> Result<TestApp> {
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
    seed::ensure_catalog(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok(TestApp {
        app,
        pool,
        _dir: dir,
    })
}

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body_json: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let req = match body_json {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

async fn register(app: &Router, name: &str, email: &str) -> Result<(String, String)> {
    let (status, value) = request(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": name, "email": email, "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "register failed: {value}");
    Ok((
        value.get("token").and_then(|v| v.as_str()).unwrap().to_string(),
        value
            .pointer("/user/id")
            .and_then(|v| v.as_str())
            .unwrap()
            .to_string(),
    ))
}

#[tokio::test]
async fn seeder_provisions_roles_and_catalog() -> Result<()> {
    let t = setup().await?;
    let (admin_token, _) = register(&t.app, "Admin", "admin@example.com").await?;

    let (status, roles) = request(&t.app, "GET", "/rbac/roles", Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = roles
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r.get("name").and_then(|v| v.as_str()))
        .collect();
    for expected in ["Administrador", "Revisor", "Técnico"] {
        assert!(names.contains(&expected), "missing role {expected}");
    }

    let (status, catalog) =
        request(&t.app, "GET", "/rbac/permissions", Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let pairs: Vec<String> = catalog
        .as_array()
        .unwrap()
        .iter()
        .map(|p| {
            format!(
                "{}:{}",
                p.get("action").and_then(|v| v.as_str()).unwrap(),
                p.get("resource").and_then(|v| v.as_str()).unwrap()
            )
        })
        .collect();
    for expected in [
        "create:progress-report",
        "read:progress-report",
        "update:progress-report",
        "approve:progress-report",
        "read:activity",
        "read:indicator",
        "read:role",
        "create:permission",
    ] {
        assert!(pairs.contains(&expected.to_string()), "missing pair {expected}");
    }

    // seeding again adds nothing
    let summary = seed::ensure_catalog(&t.pool).await?;
    assert_eq!(summary.roles_added, 0);
    assert_eq!(summary.permissions_added, 0);
    assert_eq!(summary.grants_added, 0);

    Ok(())
}

#[tokio::test]
async fn role_lifecycle_create_conflict_delete() -> Result<()> {
    let t = setup().await?;
    let (admin_token, _) = register(&t.app, "Admin", "admin@example.com").await?;

    let (status, role) = request(
        &t.app,
        "POST",
        "/rbac/roles",
        Some(&admin_token),
        Some(json!({"name": "Auditor", "description": "Read-only oversight"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let role_id = role.get("id").and_then(|v| v.as_str()).unwrap().to_string();

    // duplicate name conflicts
    let (status, _) = request(
        &t.app,
        "POST",
        "/rbac/roles",
        Some(&admin_token),
        Some(json!({"name": "Auditor"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // unheld role deletes cleanly
    let (status, _) = request(
        &t.app,
        "DELETE",
        &format!("/rbac/roles/{}", role_id),
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // a held role refuses deletion: every user holds Técnico by default
    let (_, techs) = request(&t.app, "GET", "/rbac/roles", Some(&admin_token), None).await?;
    let admin_role_id = techs
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r.get("name").and_then(|v| v.as_str()) == Some("Administrador"))
        .and_then(|r| r.get("id"))
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    let (status, value) = request(
        &t.app,
        "DELETE",
        &format!("/rbac/roles/{}", admin_role_id),
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT, "{value}");

    Ok(())
}

#[tokio::test]
async fn permission_pairs_are_normalized_and_deduplicated() -> Result<()> {
    let t = setup().await?;
    let (admin_token, _) = register(&t.app, "Admin", "admin@example.com").await?;

    // messy spelling normalizes on the way in
    let (status, value) = request(
        &t.app,
        "POST",
        "/rbac/permissions",
        Some(&admin_token),
        Some(json!({"action": "  Export ", "resource": "Progress_Report"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{value}");
    assert_eq!(value.get("action").and_then(|v| v.as_str()), Some("export"));
    assert_eq!(
        value.get("resource").and_then(|v| v.as_str()),
        Some("progress-report")
    );

    // the normalized equivalent is now a duplicate
    let (status, _) = request(
        &t.app,
        "POST",
        "/rbac/permissions",
        Some(&admin_token),
        Some(json!({"action": "export", "resource": "progress-report"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // so is a pair the seeder already registered
    let (status, _) = request(
        &t.app,
        "POST",
        "/rbac/permissions",
        Some(&admin_token),
        Some(json!({"action": "APPROVE", "resource": "progress_report"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // invalid characters are a 400, not a silent mangle
    let (status, _) = request(
        &t.app,
        "POST",
        "/rbac/permissions",
        Some(&admin_token),
        Some(json!({"action": "read!", "resource": "report"})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn grants_change_what_the_evaluator_allows() -> Result<()> {
    let t = setup().await?;
    let (admin_token, _) = register(&t.app, "Admin", "admin@example.com").await?;
    let (tech_token, _) = register(&t.app, "Tech", "tech@example.com").await?;

    // technicians cannot read the role list
    let (status, value) = request(&t.app, "GET", "/rbac/roles", Some(&tech_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(value.get("error").and_then(|v| v.as_str()), Some("forbidden"));
    assert_eq!(
        value.pointer("/details/required").and_then(|v| v.as_str()),
        Some("read:role")
    );
    let held = value
        .pointer("/details/held")
        .and_then(|v| v.as_array())
        .context("held permissions missing from denial")?;
    assert!(held
        .iter()
        .any(|p| p.as_str() == Some("create:progress-report")));

    // find the Técnico role and the read:role permission
    let (_, roles) = request(&t.app, "GET", "/rbac/roles", Some(&admin_token), None).await?;
    let tecnico_id = roles
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r.get("name").and_then(|v| v.as_str()) == Some("Técnico"))
        .and_then(|r| r.get("id"))
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    let (_, catalog) =
        request(&t.app, "GET", "/rbac/permissions", Some(&admin_token), None).await?;
    let read_role_perm_id = catalog
        .as_array()
        .unwrap()
        .iter()
        .find(|p| {
            p.get("action").and_then(|v| v.as_str()) == Some("read")
                && p.get("resource").and_then(|v| v.as_str()) == Some("role")
        })
        .and_then(|p| p.get("id"))
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    // grant read:role to Técnico
    let (status, _) = request(
        &t.app,
        "POST",
        &format!("/rbac/roles/{}/permissions", tecnico_id),
        Some(&admin_token),
        Some(json!({"permission_id": read_role_perm_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    // the same technician token now passes: permissions are data, not code
    let (status, _) = request(&t.app, "GET", "/rbac/roles", Some(&tech_token), None).await?;
    assert_eq!(status, StatusCode::OK);

    // revoke it again
    let (status, _) = request(
        &t.app,
        "DELETE",
        &format!("/rbac/roles/{}/permissions/{}", tecnico_id, read_role_perm_id),
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = request(&t.app, "GET", "/rbac/roles", Some(&tech_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // granting something outside the catalog is a 404
    let (status, _) = request(
        &t.app,
        "POST",
        &format!("/rbac/roles/{}/permissions", tecnico_id),
        Some(&admin_token),
        Some(json!({"permission_id": "00000000-0000-0000-0000-000000000000"})),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn effective_permissions_reflect_role_and_bypass() -> Result<()> {
    let t = setup().await?;
    let (admin_token, admin_id) = register(&t.app, "Admin", "admin@example.com").await?;
    let (_, tech_id) = register(&t.app, "Tech", "tech@example.com").await?;

    let (status, value) = request(
        &t.app,
        "GET",
        &format!("/rbac/users/{}/effective-permissions", admin_id),
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        value.get("role").and_then(|v| v.as_str()),
        Some("Administrador")
    );
    assert_eq!(value.get("bypass").and_then(|v| v.as_bool()), Some(true));

    let (status, value) = request(
        &t.app,
        "GET",
        &format!("/rbac/users/{}/effective-permissions", tech_id),
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value.get("role").and_then(|v| v.as_str()), Some("Técnico"));
    assert_eq!(value.get("bypass").and_then(|v| v.as_bool()), Some(false));
    let perms: Vec<&str> = value
        .get("permissions")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .filter_map(|p| p.as_str())
        .collect();
    assert_eq!(
        perms,
        vec![
            "create:progress-report",
            "read:activity",
            "read:indicator",
            "read:progress-report",
            "update:progress-report",
        ]
    );

    Ok(())
}

#[tokio::test]
async fn role_reassignment_switches_the_users_grants() -> Result<()> {
    let t = setup().await?;
    let (admin_token, _) = register(&t.app, "Admin", "admin@example.com").await?;
    let (tech_token, tech_id) = register(&t.app, "Tech", "tech@example.com").await?;

    // as a technician: cannot approve anything (no queue read either)
    let (status, _) = request(
        &t.app,
        "GET",
        "/rbac/permissions",
        Some(&tech_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, roles) = request(&t.app, "GET", "/rbac/roles", Some(&admin_token), None).await?;
    let revisor_id = roles
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r.get("name").and_then(|v| v.as_str()) == Some("Revisor"))
        .and_then(|r| r.get("id"))
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let (status, user) = request(
        &t.app,
        "PUT",
        &format!("/rbac/users/{}/role", tech_id),
        Some(&admin_token),
        Some(json!({"role_id": revisor_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        user.get("role_id").and_then(|v| v.as_str()),
        Some(revisor_id.as_str())
    );

    // permission snapshots are loaded per request, so the same token now
    // evaluates with the reviewer's grants
    let (status, value) = request(
        &t.app,
        "GET",
        &format!("/rbac/users/{}/effective-permissions", tech_id),
        Some(&tech_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{value}");
    let perms: Vec<&str> = value
        .get("permissions")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .filter_map(|p| p.as_str())
        .collect();
    assert!(perms.contains(&"approve:progress-report"));

    // assigning a nonexistent role is refused
    let (status, _) = request(
        &t.app,
        "PUT",
        &format!("/rbac/users/{}/role", tech_id),
        Some(&admin_token),
        Some(json!({"role_id": "00000000-0000-0000-0000-000000000000"})),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}
