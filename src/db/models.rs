// src/db/models.rs

//! Data models for the collector event store
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Key of the epoch entry in `collector_meta`
const EPOCH_KEY: &str = "epoch";

/// Per-store marker stamped on every event
///
/// The epoch is generated once, when the store is created, so events of a
/// re-created database can be told apart from older ones.
pub struct StoreEpoch;

impl StoreEpoch {
    /// Read the store epoch, if one has been assigned
    pub fn get(conn: &Connection) -> Result<Option<u32>> {
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM collector_meta WHERE key = ?1",
                [EPOCH_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(v) => v.parse::<u32>().map(Some).map_err(|e| {
                crate::error::Error::InitError(format!("Invalid store epoch '{}': {}", v, e))
            }),
            None => Ok(None),
        }
    }

    /// Read the store epoch, assigning a fresh one on first use
    pub fn get_or_create(conn: &Connection) -> Result<u32> {
        if let Some(epoch) = Self::get(conn)? {
            return Ok(epoch);
        }

        let epoch = Self::generate();
        conn.execute(
            "INSERT OR IGNORE INTO collector_meta (key, value) VALUES (?1, ?2)",
            params![EPOCH_KEY, epoch.to_string()],
        )?;

        // Re-read in case another writer won the insert
        Ok(Self::get(conn)?.unwrap_or(epoch))
    }

    /// Derive a non-zero 31-bit epoch from the clock
    fn generate() -> u32 {
        let mixed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() ^ (d.as_secs() as u32).rotate_left(16))
            .unwrap_or(1);
        (mixed & 0x7fff_ffff).max(1)
    }
}

/// One recorded history transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: Option<i64>,
    pub epoch: u32,
    /// RFC 3339 UTC timestamp, second precision
    pub timestamp: String,
}

impl Event {
    /// Create a new Event
    pub fn new(epoch: u32, timestamp: String) -> Self {
        Self {
            id: None,
            epoch,
            timestamp,
        }
    }

    /// Insert this event into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO events (epoch, timestamp) VALUES (?1, ?2)",
            params![self.epoch, &self.timestamp],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find the most recently recorded event
    pub fn last(conn: &Connection) -> Result<Option<Self>> {
        let mut stmt = conn
            .prepare("SELECT id, epoch, timestamp FROM events ORDER BY id DESC LIMIT 1")?;

        let event = stmt.query_row([], Self::from_row).optional()?;

        Ok(event)
    }

    /// Find an event by ID
    #[cfg(test)]
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare("SELECT id, epoch, timestamp FROM events WHERE id = ?1")?;

        let event = stmt.query_row([id], Self::from_row).optional()?;

        Ok(event)
    }

    /// List all events in recording order
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare("SELECT id, epoch, timestamp FROM events ORDER BY id")?;

        let events = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Count recorded events
    pub fn count(conn: &Connection) -> Result<i64> {
        let count = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Convert a database row to an Event
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            epoch: row.get(1)?,
            timestamp: row.get(2)?,
        })
    }
}

/// Kind of package change found in a history transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Install,
    Upgrade,
    Remove,
    Purge,
}

impl OperationKind {
    pub fn as_str(&self) -> &str {
        match self {
            OperationKind::Install => "install",
            OperationKind::Upgrade => "upgrade",
            OperationKind::Remove => "remove",
            OperationKind::Purge => "purge",
        }
    }

    /// Whether this operation takes the package version out of the inventory
    pub fn removes(&self) -> bool {
        matches!(self, OperationKind::Remove | OperationKind::Purge)
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "install" => Ok(OperationKind::Install),
            "upgrade" => Ok(OperationKind::Upgrade),
            "remove" => Ok(OperationKind::Remove),
            "purge" => Ok(OperationKind::Purge),
            _ => Err(format!("Invalid operation kind: {}", s)),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single package change attached to an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOperation {
    pub id: Option<i64>,
    pub event_id: i64,
    pub package: String,
    pub architecture: Option<String>,
    pub version: Option<String>,
    /// Version replaced by an upgrade, when the log names it
    pub old_version: Option<String>,
    /// Installed as a dependency rather than on request
    pub automatic: bool,
    pub kind: OperationKind,
}

impl PackageOperation {
    /// Create a new PackageOperation
    pub fn new(
        event_id: i64,
        package: String,
        version: Option<String>,
        kind: OperationKind,
    ) -> Self {
        Self {
            id: None,
            event_id,
            package,
            architecture: None,
            version,
            old_version: None,
            automatic: false,
            kind,
        }
    }

    /// Insert this operation into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO package_operations
                (event_id, package, architecture, version, old_version, automatic, kind)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &self.event_id,
                &self.package,
                &self.architecture,
                &self.version,
                &self.old_version,
                &self.automatic,
                self.kind.as_str(),
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find all operations belonging to an event
    pub fn find_by_event(conn: &Connection, event_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, event_id, package, architecture, version, old_version, automatic, kind
             FROM package_operations WHERE event_id = ?1 ORDER BY id",
        )?;

        let operations = stmt
            .query_map([event_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(operations)
    }

    /// List every operation in the store in replay order
    ///
    /// Ordered by event timestamp, then event id, then insertion order.
    pub fn list_in_order(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT o.id, o.event_id, o.package, o.architecture, o.version, o.old_version,
                    o.automatic, o.kind
             FROM package_operations o
             JOIN events e ON e.id = o.event_id
             ORDER BY e.timestamp, e.id, o.id",
        )?;

        let operations = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(operations)
    }

    /// Count recorded operations
    pub fn count(conn: &Connection) -> Result<i64> {
        let count =
            conn.query_row("SELECT COUNT(*) FROM package_operations", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Convert a database row to a PackageOperation
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind_str: String = row.get(7)?;
        let kind = kind_str.parse::<OperationKind>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            event_id: row.get(1)?,
            package: row.get(2)?,
            architecture: row.get(3)?,
            version: row.get(4)?,
            old_version: row.get(5)?,
            automatic: row.get(6)?,
            kind,
        })
    }
}

/// A software identity in the materialized inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareIdentity {
    pub id: Option<i64>,
    pub name: String,
    pub package: String,
    pub version: String,
    pub installed: bool,
}

impl SoftwareIdentity {
    pub(crate) const SELECT_ALL: &'static str =
        "SELECT id, name, package, version, installed FROM sw_identities ORDER BY package, version";

    /// Create a new SoftwareIdentity
    pub fn new(name: String, package: String, version: String, installed: bool) -> Self {
        Self {
            id: None,
            name,
            package,
            version,
            installed,
        }
    }

    /// List all identities ordered by package and version
    #[cfg(test)]
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(Self::SELECT_ALL)?;

        let identities = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(identities)
    }

    /// Find the identity of a package version
    pub fn find(conn: &Connection, package: &str, version: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, package, version, installed FROM sw_identities
             WHERE package = ?1 AND version = ?2",
        )?;

        let identity = stmt.query_row([package, version], Self::from_row).optional()?;

        Ok(identity)
    }

    /// Count identities currently marked installed
    #[cfg(test)]
    pub fn count_installed(conn: &Connection) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM sw_identities WHERE installed = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Replace the whole materialized view with `identities`
    ///
    /// Callers should run this inside a transaction so readers never see a
    /// half-written view.
    pub fn replace_all(conn: &Connection, identities: &mut [SoftwareIdentity]) -> Result<usize> {
        conn.execute("DELETE FROM sw_identities", [])?;

        let mut stmt = conn.prepare(
            "INSERT INTO sw_identities (name, package, version, installed) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for identity in identities.iter_mut() {
            stmt.execute(params![
                &identity.name,
                &identity.package,
                &identity.version,
                &identity.installed,
            ])?;
            identity.id = Some(conn.last_insert_rowid());
        }

        Ok(identities.len())
    }

    /// Convert a database row to a SoftwareIdentity
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            package: row.get(2)?,
            version: row.get(3)?,
            installed: row.get(4)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        schema::migrate(&conn).unwrap();
        (temp_file, conn)
    }

    #[test]
    fn test_event_crud() {
        let (_temp, conn) = create_test_db();

        assert!(Event::last(&conn).unwrap().is_none());

        let mut first = Event::new(7, "2024-01-01T01:00:00Z".to_string());
        let first_id = first.insert(&conn).unwrap();
        let mut second = Event::new(7, "2024-01-02T01:00:00Z".to_string());
        let second_id = second.insert(&conn).unwrap();

        assert!(second_id > first_id);
        assert_eq!(first.id, Some(first_id));

        let last = Event::last(&conn).unwrap().unwrap();
        assert_eq!(last.id, Some(second_id));
        assert_eq!(last.timestamp, "2024-01-02T01:00:00Z");
        assert_eq!(last.epoch, 7);

        let found = Event::find_by_id(&conn, first_id).unwrap().unwrap();
        assert_eq!(found, first);

        assert_eq!(Event::list_all(&conn).unwrap().len(), 2);
        assert_eq!(Event::count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_event_ids_not_reused() {
        let (_temp, conn) = create_test_db();

        let first_id = Event::new(1, "2024-01-01T01:00:00Z".to_string())
            .insert(&conn)
            .unwrap();
        conn.execute("DELETE FROM events WHERE id = ?1", [first_id]).unwrap();

        let second_id = Event::new(1, "2024-01-01T02:00:00Z".to_string())
            .insert(&conn)
            .unwrap();
        assert!(second_id > first_id);
    }

    #[test]
    fn test_package_operation_crud() {
        let (_temp, conn) = create_test_db();

        let event_id = Event::new(1, "2024-01-01T01:00:00Z".to_string())
            .insert(&conn)
            .unwrap();

        let mut install = PackageOperation::new(
            event_id,
            "foo".to_string(),
            Some("1.0".to_string()),
            OperationKind::Install,
        );
        install.architecture = Some("amd64".to_string());
        install.automatic = true;
        install.insert(&conn).unwrap();

        let mut purge =
            PackageOperation::new(event_id, "bar".to_string(), None, OperationKind::Purge);
        purge.insert(&conn).unwrap();

        let operations = PackageOperation::find_by_event(&conn, event_id).unwrap();
        assert_eq!(operations.len(), 2);
        assert_eq!(operations[0], install);
        assert_eq!(operations[1].kind, OperationKind::Purge);
        assert_eq!(operations[1].version, None);
        assert_eq!(PackageOperation::count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_operations_listed_in_timestamp_order() {
        let (_temp, conn) = create_test_db();

        // Recorded out of timestamp order on purpose
        let late = Event::new(1, "2024-03-01T00:00:00Z".to_string())
            .insert(&conn)
            .unwrap();
        let early = Event::new(1, "2024-01-01T00:00:00Z".to_string())
            .insert(&conn)
            .unwrap();

        PackageOperation::new(late, "foo".to_string(), None, OperationKind::Remove)
            .insert(&conn)
            .unwrap();
        PackageOperation::new(
            early,
            "foo".to_string(),
            Some("1.0".to_string()),
            OperationKind::Install,
        )
        .insert(&conn)
        .unwrap();

        let ordered = PackageOperation::list_in_order(&conn).unwrap();
        assert_eq!(ordered[0].kind, OperationKind::Install);
        assert_eq!(ordered[1].kind, OperationKind::Remove);
    }

    #[test]
    fn test_operation_requires_event() {
        let (_temp, conn) = create_test_db();

        let result = PackageOperation::new(
            42,
            "foo".to_string(),
            Some("1.0".to_string()),
            OperationKind::Install,
        )
        .insert(&conn);
        assert!(result.is_err());
    }

    #[test]
    fn test_operation_kind_parsing() {
        for kind in [
            OperationKind::Install,
            OperationKind::Upgrade,
            OperationKind::Remove,
            OperationKind::Purge,
        ] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert!("downgrade".parse::<OperationKind>().is_err());
        assert!(OperationKind::Purge.removes());
        assert!(!OperationKind::Upgrade.removes());
    }

    #[test]
    fn test_software_identity_replace_all() {
        let (_temp, conn) = create_test_db();

        let mut first = vec![
            SoftwareIdentity::new("foo-1.0".into(), "foo".into(), "1.0".into(), true),
            SoftwareIdentity::new("bar-2.0".into(), "bar".into(), "2.0".into(), false),
        ];
        SoftwareIdentity::replace_all(&conn, &mut first).unwrap();
        assert!(first.iter().all(|i| i.id.is_some()));
        assert_eq!(SoftwareIdentity::count_installed(&conn).unwrap(), 1);

        let mut second = vec![SoftwareIdentity::new(
            "foo-1.0".into(),
            "foo".into(),
            "1.0".into(),
            false,
        )];
        SoftwareIdentity::replace_all(&conn, &mut second).unwrap();

        let all = SoftwareIdentity::list_all(&conn).unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].installed);
        assert!(SoftwareIdentity::find(&conn, "bar", "2.0").unwrap().is_none());
    }

    #[test]
    fn test_store_epoch_assigned_once() {
        let (_temp, conn) = create_test_db();

        assert_eq!(StoreEpoch::get(&conn).unwrap(), None);
        let epoch = StoreEpoch::get_or_create(&conn).unwrap();
        assert!(epoch > 0);
        assert_eq!(StoreEpoch::get_or_create(&conn).unwrap(), epoch);
    }
}
