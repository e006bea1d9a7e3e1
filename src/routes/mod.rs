pub mod audit;
pub mod auth;
pub mod health;
pub mod notifications;
pub mod plan;
pub mod rbac;
pub mod reports;
