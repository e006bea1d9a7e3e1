//! Fire-and-forget user notifications.
//!
//! Workflow transitions call [`Notifier::notify`] after their transaction
//! has committed. Delivery is best-effort: an implementation logs its own
//! failures and never surfaces them, so a broken notification store cannot
//! roll back or fail an already-committed transition.

use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::events::{DomainEvent, EventBus, Severity};
use crate::utils::utc_now;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one message to each target user.
    async fn notify(&self, targets: &[Uuid], title: &str, message: &str, severity: Severity);
}

/// Stores one `notifications` row per target and announces the batch on
/// the event bus.
pub struct PersistentNotifier {
    pool: SqlitePool,
    bus: EventBus,
}

impl PersistentNotifier {
    pub fn new(pool: SqlitePool, bus: EventBus) -> Self {
        Self { pool, bus }
    }
}

#[async_trait]
impl Notifier for PersistentNotifier {
    async fn notify(&self, targets: &[Uuid], title: &str, message: &str, severity: Severity) {
        for target in targets {
            let result = sqlx::query(
                "INSERT INTO notifications (id, user_id, title, message, severity, read, created_at) \
                 VALUES (?, ?, ?, ?, ?, 0, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(target.to_string())
            .bind(title)
            .bind(message)
            .bind(severity.as_str())
            .bind(utc_now())
            .execute(&self.pool)
            .await;

            if let Err(e) = result {
                tracing::warn!("failed to store notification for user {}: {}", target, e);
            }
        }

        let event = DomainEvent::new(
            "notification.created",
            None,
            None,
            json!({
                "title": title,
                "targets": targets.len(),
                "severity": severity,
            }),
        );
        let _ = self
            .bus
            .send(serde_json::to_value(event).unwrap_or_default());
    }
}
