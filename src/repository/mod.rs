//! Repository layer for job persistence.
//!
//! [`JobStore`] is the contract the orchestrator checkpoints through.
//! [`DieselJobStore`] persists to SQLite with Diesel; [`InMemoryJobStore`]
//! keeps everything in process.

mod diesel_job;
mod job_store;
mod memory;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod util;

pub use diesel_job::DieselJobStore;
pub use job_store::{JobStore, StoreError};
pub use memory::InMemoryJobStore;
pub use pool::{DbError, SqlitePool};
