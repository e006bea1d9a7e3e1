//! Progress report approval workflow: the state machine, the append-only
//! ledger behind it, and the service that ties both to storage.

pub mod ledger;
pub mod lifecycle;
pub mod service;

pub use lifecycle::{ActorRule, TransitionAction};
pub use service::{
    create_report, execute_transition, fetch_report, list_reports, update_report, ReportFilter,
    TransitionOutcome,
};
