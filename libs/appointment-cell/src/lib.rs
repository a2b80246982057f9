pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

// Re-export models and services for the api binary and tests
pub use handlers::AppState;
pub use models::*;
pub use services::*;
