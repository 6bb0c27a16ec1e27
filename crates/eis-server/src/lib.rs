//! EIS Server
//!
//! HTTP trigger and Postgres persistence for the employee import job.
//! The batch engine itself lives in `eis-batch`; this crate supplies the
//! `axum` routes, the `sqlx`-backed execution ledger and employee store,
//! and the configuration that wires them together.

pub mod config;
pub mod error;
pub mod ledger;
pub mod routes;
pub mod store;

pub use error::{AppError, ServerResult};
