// src/db/schema.rs

//! Database schema definitions and migrations for sw-collector
//!
//! This module defines the SQLite schema for the event store and provides
//! a migration system to evolve the schema over time.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        debug!("Schema is up to date");
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!(
        "Schema migration complete. Now at version {}",
        SCHEMA_VERSION
    );
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::InitError(format!(
            "Unknown migration version: {}",
            version
        ))),
    }
}

/// Initial schema - Version 1
///
/// - collector_meta: Store-wide settings such as the epoch
/// - events: One row per recorded history transaction
/// - package_operations: Package changes belonging to an event
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE collector_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- AUTOINCREMENT keeps event ids strictly increasing and never reused
        CREATE TABLE events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            epoch INTEGER NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE INDEX idx_events_timestamp ON events(timestamp);

        CREATE TABLE package_operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id INTEGER NOT NULL,
            package TEXT NOT NULL,
            architecture TEXT,
            version TEXT,
            old_version TEXT,
            automatic INTEGER NOT NULL DEFAULT 0,
            kind TEXT NOT NULL CHECK(kind IN ('install', 'upgrade', 'remove', 'purge')),
            FOREIGN KEY (event_id) REFERENCES events(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_package_operations_event ON package_operations(event_id);
        CREATE INDEX idx_package_operations_package ON package_operations(package);
        ",
    )?;

    info!("Schema version 1 applied successfully");
    Ok(())
}

/// Schema version 2 - materialized software identities
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 2");

    conn.execute_batch(
        "
        CREATE TABLE sw_identities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            package TEXT NOT NULL,
            version TEXT NOT NULL,
            installed INTEGER NOT NULL CHECK(installed IN (0, 1)),
            UNIQUE(package, version)
        );

        CREATE INDEX idx_sw_identities_installed ON sw_identities(installed);
        ",
    )?;

    info!("Schema version 2 applied successfully");
    Ok(())
}
