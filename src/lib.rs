pub mod app;
pub mod authz;
pub mod db;
pub mod docs;
pub mod errors;
pub mod events;
pub mod extract;
pub mod jwt;
pub mod models;
pub mod notify;
pub mod routes;
pub mod utils;
pub mod workflow;

// Re-export commonly used items for tests
pub use app::create_app;
