pub mod context;
pub mod error;

pub use context::StaffContext;
pub use error::AppError;
