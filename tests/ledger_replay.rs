//! The approval ledger is the source of truth for report status. These
//! tests corrupt the stored rows out-of-band and check that replay
//! verification refuses to move a report whose ledger and status disagree.

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

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

/// Admin + activity + a technician-owned report, created in the given status.
/// Returns (admin_token, reporter_token, reporter_id, report_id).
async fn fixture(app: &Router, initial_status: &str) -> Result<(String, String, String, String)> {
    let (admin_token, _) = register(app, "Admin", "admin@example.com").await?;
    let (status, value) = request(
        app,
        "POST",
        "/activities",
        Some(&admin_token),
        Some(json!({"name": "Canal dredging"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let activity_id = value.get("id").and_then(|v| v.as_str()).unwrap().to_string();

    let (reporter_token, reporter_id) = register(app, "Reporter", "reporter@example.com").await?;
    let (status, value) = request(
        app,
        "POST",
        "/reports",
        Some(&reporter_token),
        Some(json!({
            "activity_id": activity_id,
            "period_type": "quarterly",
            "period": "2025-Q2",
            "current_value": 3.0,
            "target_value": 12.0,
            "status": initial_status
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "report create failed: {value}");
    let report_id = value.get("id").and_then(|v| v.as_str()).unwrap().to_string();

    Ok((admin_token, reporter_token, reporter_id, report_id))
}

#[tokio::test]
async fn divergent_stored_status_blocks_every_transition() -> Result<()> {
    let t = setup().await?;
    let (admin_token, reporter_token, _, report_id) = fixture(&t.app, "SUBMITTED").await?;

    // an out-of-band write flips the status without touching the ledger
    sqlx::query("UPDATE progress_reports SET status = 'DRAFT' WHERE id = ?")
        .bind(&report_id)
        .execute(&t.pool)
        .await?;

    // the reporter sees DRAFT and tries to submit again
    let (status, value) = request(
        &t.app,
        "POST",
        &format!("/reports/{}/submit", report_id),
        Some(&reporter_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{value}");
    assert_eq!(
        value.get("error").and_then(|v| v.as_str()),
        Some("data_integrity_fault")
    );

    // decisions are refused the same way
    let (status, value) = request(
        &t.app,
        "POST",
        &format!("/reports/{}/approve", report_id),
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        value.get("error").and_then(|v| v.as_str()),
        Some("data_integrity_fault")
    );

    // reads still work, so operators can inspect the damage
    let (status, history) = request(
        &t.app,
        "GET",
        &format!("/reports/{}/history", report_id),
        Some(&reporter_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().map(|a| a.len()), Some(2));

    Ok(())
}

#[tokio::test]
async fn emptied_ledger_blocks_transitions() -> Result<()> {
    let t = setup().await?;
    let (_, reporter_token, _, report_id) = fixture(&t.app, "DRAFT").await?;

    sqlx::query("DELETE FROM approval_history WHERE report_id = ?")
        .bind(&report_id)
        .execute(&t.pool)
        .await?;

    let (status, value) = request(
        &t.app,
        "POST",
        &format!("/reports/{}/submit", report_id),
        Some(&reporter_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        value.get("error").and_then(|v| v.as_str()),
        Some("data_integrity_fault")
    );

    Ok(())
}

#[tokio::test]
async fn illegal_ledger_step_blocks_transitions() -> Result<()> {
    let t = setup().await?;
    let (_, reporter_token, reporter_id, report_id) = fixture(&t.app, "DRAFT").await?;

    // an APPROVED entry directly after CREATED can never happen through the
    // state machine; replay must refuse to make sense of it
    sqlx::query(
        "INSERT INTO approval_history (id, report_id, action, actor_id, comment, created_at) \
         VALUES (?, ?, 'APPROVED', ?, NULL, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&report_id)
    .bind(&reporter_id)
    .bind(Utc::now())
    .execute(&t.pool)
    .await?;

    let (status, value) = request(
        &t.app,
        "POST",
        &format!("/reports/{}/submit", report_id),
        Some(&reporter_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        value.get("error").and_then(|v| v.as_str()),
        Some("data_integrity_fault")
    );

    Ok(())
}

#[tokio::test]
async fn intact_ledger_keeps_working_after_inspection() -> Result<()> {
    let t = setup().await?;
    let (admin_token, reporter_token, _, report_id) = fixture(&t.app, "SUBMITTED").await?;

    // nothing tampered: history reads and the next transition both succeed
    let (status, history) = request(
        &t.app,
        "GET",
        &format!("/reports/{}/history", report_id),
        Some(&reporter_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let seqs: Vec<i64> = history
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e.get("seq").and_then(|v| v.as_i64()))
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    let (status, value) = request(
        &t.app,
        "POST",
        &format!("/reports/{}/approve", report_id),
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "approve failed: {value}");

    // every ledger row still carries the acting user
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT action, actor_id FROM approval_history WHERE report_id = ? ORDER BY seq")
            .bind(&report_id)
            .fetch_all(&t.pool)
            .await?;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|(_, actor)| !actor.is_empty()));

    Ok(())
}
