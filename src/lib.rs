// src/lib.rs

//! Software inventory collector
//!
//! Reads the package manager's history log, records every package
//! transaction as an event in a local SQLite store, and maintains the
//! resulting inventory of software identities.
//!
//! # Architecture
//!
//! - Database-first: events and operations live in SQLite, the inventory is
//!   derived from them
//! - Incremental: each run resumes after the last recorded event and may be
//!   capped to a batch of new events
//! - Atomic: a log transaction is stored completely or not at all

pub mod config;
pub mod db;
mod error;
pub mod history;
pub mod inventory;
pub mod logging;
pub mod remote;

pub use error::{Error, Result};
