use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::Loggable;
use crate::models::user::parse_uuid;

/// The closed status vocabulary of the approval workflow.
///
/// These four tags are the only spellings that exist anywhere: API payloads,
/// stored rows and ledger replay all use them verbatim. Display translation
/// is the UI's problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "DRAFT",
            ReportStatus::Submitted => "SUBMITTED",
            ReportStatus::Approved => "APPROVED",
            ReportStatus::Rejected => "REJECTED",
        }
    }

    /// Strict parse. No case folding, no localized spellings.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "DRAFT" => Ok(ReportStatus::Draft),
            "SUBMITTED" => Ok(ReportStatus::Submitted),
            "APPROVED" => Ok(ReportStatus::Approved),
            "REJECTED" => Ok(ReportStatus::Rejected),
            other => Err(AppError::data_integrity(format!(
                "unknown report status {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger vocabulary. One entry per committed transition, plus `CREATED`
/// when the report row comes into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalAction {
    Created,
    Submitted,
    Approved,
    Rejected,
    Resubmitted,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Created => "CREATED",
            ApprovalAction::Submitted => "SUBMITTED",
            ApprovalAction::Approved => "APPROVED",
            ApprovalAction::Rejected => "REJECTED",
            ApprovalAction::Resubmitted => "RESUBMITTED",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "CREATED" => Ok(ApprovalAction::Created),
            "SUBMITTED" => Ok(ApprovalAction::Submitted),
            "APPROVED" => Ok(ApprovalAction::Approved),
            "REJECTED" => Ok(ApprovalAction::Rejected),
            "RESUBMITTED" => Ok(ApprovalAction::Resubmitted),
            other => Err(AppError::data_integrity(format!(
                "unknown ledger action {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressReport {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicator_id: Option<Uuid>,
    #[schema(example = "quarterly")]
    pub period_type: String,
    #[schema(example = "2025-Q1")]
    pub period: String,
    pub current_value: Option<f64>,
    pub target_value: Option<f64>,
    /// Derived: round2(current/target*100) when target > 0, otherwise unset
    pub execution_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenges: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<String>,
    pub reported_by: Uuid,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for ProgressReport {
    fn entity_type() -> &'static str {
        "report"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbProgressReport {
    pub id: String,
    pub activity_id: Option<String>,
    pub indicator_id: Option<String>,
    pub period_type: String,
    pub period: String,
    pub current_value: Option<f64>,
    pub target_value: Option<f64>,
    pub execution_percentage: Option<f64>,
    pub comments: Option<String>,
    pub challenges: Option<String>,
    pub next_steps: Option<String>,
    pub reported_by: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbProgressReport> for ProgressReport {
    type Error = AppError;

    fn try_from(db: DbProgressReport) -> Result<Self, Self::Error> {
        Ok(ProgressReport {
            id: parse_uuid(&db.id)?,
            activity_id: db.activity_id.as_deref().map(parse_uuid).transpose()?,
            indicator_id: db.indicator_id.as_deref().map(parse_uuid).transpose()?,
            period_type: db.period_type,
            period: db.period,
            current_value: db.current_value,
            target_value: db.target_value,
            execution_percentage: db.execution_percentage,
            comments: db.comments,
            challenges: db.challenges,
            next_steps: db.next_steps,
            reported_by: parse_uuid(&db.reported_by)?,
            status: ReportStatus::parse(&db.status)?,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReportCreateRequest {
    /// Exactly one of activity_id / indicator_id must be set
    pub activity_id: Option<Uuid>,
    pub indicator_id: Option<Uuid>,
    #[schema(example = "quarterly")]
    pub period_type: String,
    #[schema(example = "2025-Q1")]
    pub period: String,
    pub current_value: Option<f64>,
    pub target_value: Option<f64>,
    pub comments: Option<String>,
    pub challenges: Option<String>,
    pub next_steps: Option<String>,
    /// DRAFT (default) or SUBMITTED for direct submission
    pub status: Option<ReportStatus>,
}

/// Edit payload for DRAFT / REJECTED reports. Setting `activity_id` or
/// `indicator_id` retargets the report (clearing the other side); leaving
/// both unset keeps the current target.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReportUpdateRequest {
    pub activity_id: Option<Uuid>,
    pub indicator_id: Option<Uuid>,
    pub period_type: Option<String>,
    pub period: Option<String>,
    pub current_value: Option<f64>,
    pub target_value: Option<f64>,
    pub comments: Option<String>,
    pub challenges: Option<String>,
    pub next_steps: Option<String>,
}

/// Body for submit/approve/reject/resubmit. The whole body is optional.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TransitionRequest {
    #[schema(example = "Verified against the field data")]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportListQuery {
    pub status: Option<String>,
    pub mine: Option<bool>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApprovalHistoryEntry {
    /// Commit-order sequence number, unique per ledger
    pub seq: i64,
    pub id: Uuid,
    pub report_id: Uuid,
    pub action: ApprovalAction,
    pub actor_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbApprovalHistoryEntry {
    pub seq: i64,
    pub id: String,
    pub report_id: String,
    pub action: String,
    pub actor_id: String,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbApprovalHistoryEntry> for ApprovalHistoryEntry {
    type Error = AppError;

    fn try_from(db: DbApprovalHistoryEntry) -> Result<Self, Self::Error> {
        Ok(ApprovalHistoryEntry {
            seq: db.seq,
            id: parse_uuid(&db.id)?,
            report_id: parse_uuid(&db.report_id)?,
            action: ApprovalAction::parse(&db.action)?,
            actor_id: parse_uuid(&db.actor_id)?,
            comment: db.comment,
            created_at: db.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_serde() {
        let json = serde_json::to_string(&ReportStatus::Submitted).expect("serialize");
        assert_eq!(json, "\"SUBMITTED\"");
        let back: ReportStatus = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, ReportStatus::Submitted);
    }

    #[test]
    fn alternate_spellings_are_rejected() {
        assert!(serde_json::from_str::<ReportStatus>("\"draft\"").is_err());
        assert!(serde_json::from_str::<ReportStatus>("\"aprobado\"").is_err());
        assert!(serde_json::from_str::<ReportStatus>("\"pendiente\"").is_err());
        assert!(ReportStatus::parse("Approved").is_err());
        assert!(ReportStatus::parse("").is_err());
    }

    #[test]
    fn ledger_action_parse_is_strict() {
        assert_eq!(
            ApprovalAction::parse("RESUBMITTED").expect("parse"),
            ApprovalAction::Resubmitted
        );
        assert!(ApprovalAction::parse("resubmitted").is_err());
    }
}
