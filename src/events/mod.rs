use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(
        name: impl Into<String>,
        actor_id: Option<Uuid>,
        subject_id: Option<Uuid>,
        payload: T,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Request context for activity logging (IP, User-Agent, etc.)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract context from Axum request headers
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }
}

/// Structured activity payload carried on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    /// The current/new state of the entity
    #[serde(rename = "new")]
    pub current: Value,
    /// The previous state (for update/delete operations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    /// Request context (IP, User-Agent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    /// Severity level for retention policy
    pub severity: Severity,
}

/// Helper function to log activity for any entity implementing `Loggable`.
/// This reduces boilerplate in handlers.
pub fn log_activity<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
) {
    log_activity_with_context(event_bus, action, actor_id, entity, None, None);
}

/// Activity logging with old/new tracking and request context.
///
/// Failures are dropped on purpose: a full bus or closed channel must never
/// fail the request that triggered the event.
pub fn log_activity_with_context<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
    old_entity: Option<&T>,
    context: Option<RequestContext>,
) {
    let event_name = format!("{}.{}", T::entity_type(), action);

    let severity = entity.severity_for_action(action);
    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: old_entity.map(|e| serde_json::to_value(e).unwrap_or_default()),
        context,
        severity,
    };

    let event = DomainEvent::new(
        event_name,
        actor_id,
        Some(entity.subject_id()),
        serde_json::to_value(&payload).unwrap_or_default(),
    );

    let _ = event_bus.send(serde_json::to_value(event).unwrap_or_default());
}

fn describe(event_name: &str) -> &'static str {
    match event_name {
        "report.created" => "Progress report created",
        "report.updated" => "Progress report updated",
        "report.submitted" => "Progress report submitted for review",
        "report.approved" => "Progress report approved",
        "report.rejected" => "Progress report rejected",
        "report.resubmitted" => "Progress report resubmitted after rejection",
        "user.registered" => "New user registered",
        "user.login" => "User logged in",
        "user.updated" => "User updated",
        "role.created" => "Role created",
        "role.deleted" => "Role deleted",
        "role_permission.assigned" => "Permission granted to role",
        "role_permission.revoked" => "Permission revoked from role",
        "user_role.assigned" => "User role changed",
        "permission.created" => "Permission registered",
        "activity.created" => "Planning activity created",
        "indicator.created" => "Indicator created",
        "notification.created" => "Notifications dispatched",
        _ => "System event",
    }
}

/// Drains the event bus into the `activity_log` projection and the
/// hash-chained `event_store`. Runs for the lifetime of the process;
/// persistence failures are logged and skipped so the bus keeps draining.
pub async fn start_activity_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("activity listener started");
    while let Ok(event) = rx.recv().await {
        let event_json = event.clone();

        let name = event
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let actor_id = event
            .get("actor_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        let subject_id = event
            .get("subject_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        let occurred_at = event
            .get("occurred_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let severity = event
            .get("payload")
            .and_then(|p| p.get("severity"))
            .and_then(|s| s.as_str())
            .unwrap_or("important")
            .to_string();

        let description = describe(&name);
        let properties = serde_json::to_string(&event_json).unwrap_or_default();

        let result = sqlx::query(
            "INSERT INTO activity_log (id, event_name, description, actor_id, subject_id, occurred_at, properties, severity) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&name)
        .bind(description)
        .bind(actor_id.map(|u| u.to_string()))
        .bind(subject_id.map(|u| u.to_string()))
        .bind(occurred_at)
        .bind(&properties)
        .bind(&severity)
        .execute(&pool)
        .await;

        if let Err(e) = result {
            tracing::error!("failed to save activity log: {}", e);
        }

        // Chain each event onto the previous one: hash = SHA256(prev_hash || payload).
        // rowid order is insertion order, which is what the chain follows.
        let prev_hash: Option<String> =
            sqlx::query_scalar("SELECT hash FROM event_store ORDER BY rowid DESC LIMIT 1")
                .fetch_optional(&pool)
                .await
                .ok()
                .flatten();

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        if let Some(ref ph) = prev_hash {
            hasher.update(ph.as_bytes());
        }
        hasher.update(properties.as_bytes());
        let hash = hex::encode(hasher.finalize());

        let result = sqlx::query(
            "INSERT INTO event_store (id, event_name, occurred_at, actor_id, subject_id, payload, severity, prev_hash, hash, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&name)
        .bind(occurred_at)
        .bind(actor_id.map(|u| u.to_string()))
        .bind(subject_id.map(|u| u.to_string()))
        .bind(&properties)
        .bind(&severity)
        .bind(&prev_hash)
        .bind(&hash)
        .bind(Utc::now())
        .execute(&pool)
        .await;

        if let Err(e) = result {
            tracing::error!("failed to save to event store: {}", e);
        }
    }
}
