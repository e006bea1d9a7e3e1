use super::permission::RequiredPermission;
use super::principal::Principal;
use crate::errors::AppError;

/// Outcome of an authorization check.
///
/// A denial carries the pairs that would have satisfied the check and the
/// pairs the caller actually holds, so the 403 body can say both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny {
        required: Vec<String>,
        held: Vec<String>,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Turn a denial into the error the API surfaces.
    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny { required, held } => Err(AppError::PermissionDenied {
                required: required.join(" | "),
                held,
            }),
        }
    }
}

/// Policy evaluator trait for pluggable authorization logic.
///
/// Evaluation is a pure function of the principal's materialized permission
/// set, so implementations never touch the database.
pub trait PolicyEvaluator: Send + Sync {
    /// Check a single required pair.
    fn authorize(&self, principal: &Principal, required: RequiredPermission) -> Decision;

    /// Whether this principal's role skips permission checks. Exposed for
    /// readouts like the effective-permissions endpoint; the comparison
    /// itself never leaves the evaluator.
    fn is_bypass(&self, principal: &Principal) -> bool;

    /// Check a set of alternatives; any one pair satisfies the check.
    fn authorize_any(&self, principal: &Principal, required: &[RequiredPermission]) -> Decision {
        for pair in required {
            if self.authorize(principal, *pair).is_allowed() {
                return Decision::Allow;
            }
        }
        Decision::Deny {
            required: required.iter().map(|p| p.key()).collect(),
            held: principal.held_permissions(),
        }
    }
}

/// Default evaluator with standard RBAC logic.
///
/// Evaluation order:
/// 1. bypass role -> allow
/// 2. role permission match on the (action, resource) pair -> allow
/// 3. deny
#[derive(Debug, Clone)]
pub struct DefaultPolicyEvaluator {
    bypass_role: String,
}

impl DefaultPolicyEvaluator {
    pub fn new(bypass_role: impl Into<String>) -> Self {
        Self {
            bypass_role: bypass_role.into(),
        }
    }

    pub fn bypass_role(&self) -> &str {
        &self.bypass_role
    }
}

impl PolicyEvaluator for DefaultPolicyEvaluator {
    fn authorize(&self, principal: &Principal, required: RequiredPermission) -> Decision {
        if self.is_bypass(principal) {
            tracing::debug!(
                user_id = %principal.user_id,
                permission = %required,
                role = %principal.role_name,
                "bypass role"
            );
            return Decision::Allow;
        }

        if principal.has_permission(&required.key()) {
            tracing::debug!(
                user_id = %principal.user_id,
                permission = %required,
                "role permission match"
            );
            return Decision::Allow;
        }

        tracing::debug!(
            user_id = %principal.user_id,
            permission = %required,
            "permission denied"
        );
        Decision::Deny {
            required: vec![required.key()],
            held: principal.held_permissions(),
        }
    }

    fn is_bypass(&self, principal: &Principal) -> bool {
        principal.role_name == self.bypass_role
    }
}
