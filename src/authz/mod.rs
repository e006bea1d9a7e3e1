//! Role-based authorization.
//!
//! Permissions are data, not code: each one is an `(action, resource)` pair
//! stored in the catalog and granted to roles. Handlers declare the pair
//! they need and ask the evaluator. The bypass role is honored in exactly
//! one place, inside [`DefaultPolicyEvaluator`]; nothing else may compare
//! role names to short-circuit a check.

mod evaluator;
mod permission;
mod principal;
pub mod seed;

pub use evaluator::{Decision, DefaultPolicyEvaluator, PolicyEvaluator};
pub use permission::{Permission, RequiredPermission};
pub use principal::{load_principal, Principal};

/// Role names provisioned by the seeder.
pub mod roles {
    pub const ADMINISTRADOR: &str = "Administrador";
    pub const REVISOR: &str = "Revisor";
    pub const TECNICO: &str = "Técnico";
}

/// Role that skips permission checks. Overridable via `BYPASS_ROLE`.
pub fn bypass_role_from_env() -> String {
    std::env::var("BYPASS_ROLE").unwrap_or_else(|_| roles::ADMINISTRADOR.to_string())
}

/// Role assigned to self-registered users. Overridable via `DEFAULT_ROLE`.
pub fn signup_role_from_env() -> String {
    std::env::var("DEFAULT_ROLE").unwrap_or_else(|_| roles::TECNICO.to_string())
}

/// Permission pairs the API checks against. The seeder registers every
/// pair listed here, so the catalog and the checks cannot drift apart.
pub mod permissions {
    use super::RequiredPermission;

    pub const CREATE_PROGRESS_REPORT: RequiredPermission =
        RequiredPermission::new("create", "progress-report");
    pub const READ_PROGRESS_REPORT: RequiredPermission =
        RequiredPermission::new("read", "progress-report");
    pub const UPDATE_PROGRESS_REPORT: RequiredPermission =
        RequiredPermission::new("update", "progress-report");
    pub const APPROVE_PROGRESS_REPORT: RequiredPermission =
        RequiredPermission::new("approve", "progress-report");

    pub const CREATE_ACTIVITY: RequiredPermission = RequiredPermission::new("create", "activity");
    pub const READ_ACTIVITY: RequiredPermission = RequiredPermission::new("read", "activity");

    pub const CREATE_INDICATOR: RequiredPermission = RequiredPermission::new("create", "indicator");
    pub const READ_INDICATOR: RequiredPermission = RequiredPermission::new("read", "indicator");

    pub const CREATE_ROLE: RequiredPermission = RequiredPermission::new("create", "role");
    pub const READ_ROLE: RequiredPermission = RequiredPermission::new("read", "role");
    pub const UPDATE_ROLE: RequiredPermission = RequiredPermission::new("update", "role");
    pub const DELETE_ROLE: RequiredPermission = RequiredPermission::new("delete", "role");

    pub const CREATE_PERMISSION: RequiredPermission =
        RequiredPermission::new("create", "permission");
    pub const READ_PERMISSION: RequiredPermission = RequiredPermission::new("read", "permission");

    pub const READ_USER: RequiredPermission = RequiredPermission::new("read", "user");
    pub const UPDATE_USER: RequiredPermission = RequiredPermission::new("update", "user");

    pub const READ_ACTIVITY_LOG: RequiredPermission =
        RequiredPermission::new("read", "activity-log");

    /// Everything the seeder provisions into the catalog.
    pub const CATALOG: &[RequiredPermission] = &[
        CREATE_PROGRESS_REPORT,
        READ_PROGRESS_REPORT,
        UPDATE_PROGRESS_REPORT,
        APPROVE_PROGRESS_REPORT,
        CREATE_ACTIVITY,
        READ_ACTIVITY,
        CREATE_INDICATOR,
        READ_INDICATOR,
        CREATE_ROLE,
        READ_ROLE,
        UPDATE_ROLE,
        DELETE_ROLE,
        CREATE_PERMISSION,
        READ_PERMISSION,
        READ_USER,
        UPDATE_USER,
        READ_ACTIVITY_LOG,
    ];
}
