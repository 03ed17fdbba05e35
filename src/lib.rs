//! Techwatch data exchange.
//!
//! This crate provides the core functionality for the `tw` CLI tool: moving
//! curated records (tags, links, curation sessions, provider credentials,
//! model configs, instruction templates) between independent instances
//! through portable archives.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`exchange`] - Archive codec, reconciliation, and conflict resolution
//! - [`storage`] - SQLite database layer
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod exchange;
pub mod storage;

pub use error::{Error, Result};
