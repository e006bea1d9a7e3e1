pub mod audit;
pub mod notification;
pub mod plan;
pub mod rbac;
pub mod report;
pub mod user;
