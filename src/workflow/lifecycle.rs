//! The approval state machine.
//!
//! This module owns the transition table: which actions are legal from which
//! status, the permission pairs each action demands, and the actor rule each
//! action enforces. Everything else (persistence, notifications) lives in
//! the service layer.

use crate::authz::{permissions, RequiredPermission};
use crate::errors::AppError;
use crate::models::report::{ApprovalAction, ReportStatus};

/// Workflow verbs a caller can request on an existing report.
/// Creation is not a transition; it is handled at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    Submit,
    Approve,
    Reject,
    Resubmit,
}

impl TransitionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionAction::Submit => "submit",
            TransitionAction::Approve => "approve",
            TransitionAction::Reject => "reject",
            TransitionAction::Resubmit => "resubmit",
        }
    }
}

impl std::fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may trigger a given action, beyond holding the permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRule {
    /// Only the reporting user (submit, resubmit)
    CreatorOnly,
    /// Anyone but the reporting user (approve, reject)
    NotCreator,
}

/// The transition table. Returns the resulting status when `action` is
/// legal from `from`, otherwise the `invalid_transition` error.
///
/// APPROVED is terminal: nothing is legal from it.
pub fn next_status(from: ReportStatus, action: TransitionAction) -> Result<ReportStatus, AppError> {
    let next = match (from, action) {
        (ReportStatus::Draft, TransitionAction::Submit) => Some(ReportStatus::Submitted),
        (ReportStatus::Submitted, TransitionAction::Approve) => Some(ReportStatus::Approved),
        (ReportStatus::Submitted, TransitionAction::Reject) => Some(ReportStatus::Rejected),
        (ReportStatus::Rejected, TransitionAction::Resubmit) => Some(ReportStatus::Submitted),
        _ => None,
    };

    next.ok_or_else(|| AppError::InvalidTransition {
        from: from.to_string(),
        action: action.to_string(),
    })
}

/// Permission alternatives for an action; holding any one suffices.
pub fn required_permissions(action: TransitionAction) -> &'static [RequiredPermission] {
    match action {
        TransitionAction::Submit | TransitionAction::Resubmit => &[
            permissions::CREATE_PROGRESS_REPORT,
            permissions::UPDATE_PROGRESS_REPORT,
        ],
        TransitionAction::Approve | TransitionAction::Reject => {
            &[permissions::APPROVE_PROGRESS_REPORT]
        }
    }
}

pub fn actor_rule(action: TransitionAction) -> ActorRule {
    match action {
        TransitionAction::Submit | TransitionAction::Resubmit => ActorRule::CreatorOnly,
        TransitionAction::Approve | TransitionAction::Reject => ActorRule::NotCreator,
    }
}

/// The ledger entry a committed transition records.
pub fn ledger_action(action: TransitionAction) -> ApprovalAction {
    match action {
        TransitionAction::Submit => ApprovalAction::Submitted,
        TransitionAction::Approve => ApprovalAction::Approved,
        TransitionAction::Reject => ApprovalAction::Rejected,
        TransitionAction::Resubmit => ApprovalAction::Resubmitted,
    }
}

/// Past-tense verb for activity log event names ("report.approved").
pub fn log_verb(action: TransitionAction) -> &'static str {
    match action {
        TransitionAction::Submit => "submitted",
        TransitionAction::Approve => "approved",
        TransitionAction::Reject => "rejected",
        TransitionAction::Resubmit => "resubmitted",
    }
}
