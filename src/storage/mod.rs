//! SQLite storage layer.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode for concurrent reads
//! - `BEGIN IMMEDIATE` transactions so writers serialize
//! - A `UNIQUE(kind, natural_key)` constraint as the final arbiter of identity
//! - Audit events for history
//!
//! # Submodules
//!
//! - [`events`] - Audit event storage
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Main SQLite storage implementation

pub mod events;
pub mod schema;
pub mod sqlite;

pub use sqlite::{MutationContext, SqliteStorage};
