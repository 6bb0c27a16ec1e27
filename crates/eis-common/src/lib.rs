//! EIS Common Library
//!
//! Shared types, utilities, and error handling for the EIS workspace:
//!
//! - **Error Handling**: the [`EisError`] type and [`Result`] alias
//! - **Logging**: tracing subscriber bootstrap driven by environment
//! - **Types**: the [`Employee`] record exchanged between the batch
//!   engine and the storage layer

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{EisError, Result};
pub use types::Employee;
