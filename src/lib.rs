//! persona - chunked LLM personality analysis.
//!
//! Profiles are analyzed in six ordered stages against a text generator.
//! Stage results are checkpointed to SQLite so interrupted jobs resume where
//! they stopped, and batches run through a rate-limited dispatcher.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod llm;
pub mod models;
pub mod rate_limit;
pub mod repository;
mod schema;
