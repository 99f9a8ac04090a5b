// src/inventory.rs

//! Materialized software inventory
//!
//! The `sw_identities` table is a derived view: it is rebuilt by replaying
//! every recorded package operation in timestamp order and is never edited
//! directly. [`InventoryLister`] is the read side.

use crate::db;
use crate::db::models::{OperationKind, PackageOperation, SoftwareIdentity};
use crate::error::{Error, Result};
use crate::logging::LogConfig;
use rusqlite::Connection;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Totals of an inventory pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InventorySummary {
    pub total: usize,
    pub installed: usize,
}

impl InventorySummary {
    /// Identities that were installed at some point but no longer are
    pub fn removed(&self) -> usize {
        self.total - self.installed
    }

    fn record(&mut self, identity: &SoftwareIdentity) {
        self.total += 1;
        if identity.installed {
            self.installed += 1;
        }
    }
}

/// Software identifier of a package version, optionally OS-qualified
pub fn identity_name(os: Option<&str>, package: &str, version: &str) -> String {
    match os {
        Some(os) if !os.is_empty() => format!("{}-{}-{}", os, package, version),
        _ => format!("{}-{}", package, version),
    }
}

/// Replay operations (already in timestamp order) into identities
///
/// Install and Upgrade mark the named version installed; an upgrade that
/// names the version it replaces marks that one removed. Remove and Purge
/// mark the named version removed, or every known version of the package
/// when the log gives none.
pub fn fold_operations(operations: &[PackageOperation], os: Option<&str>) -> Vec<SoftwareIdentity> {
    let mut state: BTreeMap<(String, String), bool> = BTreeMap::new();

    for op in operations {
        match (op.kind, &op.version) {
            (kind, version) if kind.removes() => match version {
                Some(version) => {
                    state.insert((op.package.clone(), version.clone()), false);
                }
                None => {
                    for ((_, _), installed) in state
                        .range_mut((op.package.clone(), String::new())..)
                        .take_while(|((package, _), _)| *package == op.package)
                    {
                        *installed = false;
                    }
                }
            },
            (kind, version) => {
                if kind == OperationKind::Upgrade {
                    if let Some(old) = &op.old_version {
                        state.insert((op.package.clone(), old.clone()), false);
                    }
                }
                if let Some(version) = version {
                    state.insert((op.package.clone(), version.clone()), true);
                }
            }
        }
    }

    state
        .into_iter()
        .map(|((package, version), installed)| {
            SoftwareIdentity::new(identity_name(os, &package, &version), package, version, installed)
        })
        .collect()
}

/// Rebuild the materialized inventory from every recorded operation
pub fn merge_installed(conn: &mut Connection, os: Option<&str>) -> Result<InventorySummary> {
    db::transaction(conn, |tx| {
        let operations = PackageOperation::list_in_order(tx)?;
        let mut identities = fold_operations(&operations, os);
        SoftwareIdentity::replace_all(tx, &mut identities)?;

        let mut summary = InventorySummary::default();
        for identity in &identities {
            summary.record(identity);
        }
        debug!(
            "Merged {} operations into {} software identities",
            operations.len(),
            summary.total
        );
        Ok(summary)
    })
}

/// Read-only enumeration of the materialized inventory
pub struct InventoryLister<'c> {
    conn: &'c Connection,
    log: LogConfig,
}

impl<'c> InventoryLister<'c> {
    pub fn new(conn: &'c Connection, log: LogConfig) -> Self {
        Self { conn, log }
    }

    /// Visit every identity in (package, version) order
    ///
    /// Rows are pulled from the database cursor one at a time. Fails with
    /// `StoreUnavailable` if the query cannot start; an error returned by
    /// `visit` stops the enumeration and is passed through.
    pub fn enumerate<F>(&self, mut visit: F) -> Result<InventorySummary>
    where
        F: FnMut(&SoftwareIdentity) -> Result<()>,
    {
        let mut stmt = self
            .conn
            .prepare(SoftwareIdentity::SELECT_ALL)
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        let mut summary = InventorySummary::default();
        while let Some(row) = rows.next()? {
            let identity = SoftwareIdentity::from_row(row)?;
            summary.record(&identity);
            visit(&identity)?;
        }

        info!(
            total = summary.total,
            installed = summary.installed,
            "Listed software inventory"
        );
        self.log.notice(format_args!(
            "retrieved {} software identities with {} installed and {} deleted",
            summary.total,
            summary.installed,
            summary.removed()
        ));
        Ok(summary)
    }
}
