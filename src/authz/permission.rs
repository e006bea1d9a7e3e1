use std::fmt;

use crate::errors::AppError;

/// A permission pair a handler can require, known at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredPermission {
    pub action: &'static str,
    pub resource: &'static str,
}

impl RequiredPermission {
    pub const fn new(action: &'static str, resource: &'static str) -> Self {
        Self { action, resource }
    }

    /// Canonical lookup key, `action:resource`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.action, self.resource)
    }
}

impl fmt::Display for RequiredPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action, self.resource)
    }
}

/// A validated permission pair as stored in the catalog.
///
/// Construction goes through [`Permission::parse`], so a value of this type
/// is always normalized: lowercase, trimmed, underscores folded to hyphens.
/// `create:progress_report` and ` CREATE:progress-report ` both identify
/// the same permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    action: String,
    resource: String,
}

impl Permission {
    pub fn parse(action: &str, resource: &str) -> Result<Self, AppError> {
        Ok(Self {
            action: normalize(action, "action")?,
            resource: normalize(resource, "resource")?,
        })
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.action, self.resource)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action, self.resource)
    }
}

fn normalize(raw: &str, field: &str) -> Result<String, AppError> {
    let value = raw.trim().to_lowercase().replace('_', "-");
    if value.is_empty() {
        return Err(AppError::bad_request(format!(
            "permission {field} must not be empty"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(AppError::bad_request(format!(
            "permission {field} {value:?} contains invalid characters (allowed: a-z, 0-9, hyphen)"
        )));
    }
    Ok(value)
}
