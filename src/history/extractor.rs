// src/history/extractor.rs

//! Incremental extraction of history transactions into the event store
//!
//! Each run resumes after the last recorded event: transactions whose
//! `Start-Date` is not later than the last stored timestamp are skipped,
//! every later one becomes an event with its package operations. A run can
//! be capped to a number of new events; the next run continues from there.
//!
//! An event and its operations are written in one database transaction,
//! committed when the transaction's `End-Date` is read. A run that fails
//! half-way through a log transaction therefore leaves nothing of it behind.

use super::parser::{Label, PackageEntry, TimestampZone, TransactionParser};
use super::source::LogSource;
use crate::db;
use crate::db::models::{Event, OperationKind, PackageOperation, StoreEpoch};
use crate::error::{Error, Result};
use crate::inventory::{self, InventorySummary};
use crate::logging::LogConfig;
use rusqlite::Connection;
use std::fmt;
use tracing::{debug, info, trace, warn};

/// Extraction state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    /// Skipping transactions recorded by an earlier run
    Seeking,
    /// Past the resume point, recording every transaction
    Recording,
    /// Batch limit reached
    Capped,
    /// End of input reached
    Done,
    Failed,
}

impl fmt::Display for ExtractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtractionState::Seeking => "seeking",
            ExtractionState::Recording => "recording",
            ExtractionState::Capped => "capped",
            ExtractionState::Done => "done",
            ExtractionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-run extraction settings
#[derive(Debug, Clone, Default)]
pub struct ExtractionOptions {
    /// Maximum number of new events for this run, 0 for no limit
    pub count: u32,
    /// Zone the log's dates are written in
    pub zone: TimestampZone,
    /// OS label used to qualify software identifiers
    pub os: Option<String>,
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    /// `Done` or `Capped`
    pub state: ExtractionState,
    /// Last event stored before this run
    pub resumed_from: Option<Event>,
    pub events_recorded: usize,
    pub operations_recorded: usize,
    pub last_event_id: Option<i64>,
    /// Materialized inventory after the merge
    pub inventory: InventorySummary,
}

/// A log transaction waiting for its `End-Date`
struct PendingTransaction {
    line: usize,
    timestamp: String,
    operations: Vec<(OperationKind, PackageEntry)>,
}

impl PendingTransaction {
    fn new(line: usize, timestamp: String) -> Self {
        Self {
            line,
            timestamp,
            operations: Vec::new(),
        }
    }
}

/// Drives one extraction run against an event store
pub struct ExtractionEngine<'c> {
    conn: &'c mut Connection,
    options: ExtractionOptions,
    log: LogConfig,
    state: ExtractionState,
}

impl<'c> ExtractionEngine<'c> {
    pub fn new(conn: &'c mut Connection, options: ExtractionOptions, log: LogConfig) -> Self {
        Self {
            conn,
            options,
            log,
            state: ExtractionState::Seeking,
        }
    }

    pub fn state(&self) -> ExtractionState {
        self.state
    }

    /// Extract new transactions from `source`, then rebuild the inventory
    pub fn run(&mut self, source: &LogSource) -> Result<ExtractionReport> {
        self.extract(source).inspect_err(|e| {
            warn!("Extraction of {} failed: {}", source.path().display(), e);
            self.transition(ExtractionState::Failed);
        })
    }

    fn transition(&mut self, next: ExtractionState) {
        if self.state != next {
            debug!("Extraction state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn extract(&mut self, source: &LogSource) -> Result<ExtractionReport> {
        let epoch = StoreEpoch::get_or_create(self.conn)?;
        let resumed_from = Event::last(self.conn)?;
        let resume_id = resumed_from.as_ref().and_then(|e| e.id).unwrap_or(0);

        match &resumed_from {
            Some(last) => {
                info!(
                    "Last-Event: {}, eid = {}, epoch = {}",
                    last.timestamp, resume_id, last.epoch
                );
                self.transition(ExtractionState::Seeking);
            }
            None => {
                info!("Event store is empty, recording from the first transaction");
                self.transition(ExtractionState::Recording);
            }
        }

        let mut report = ExtractionReport {
            state: self.state,
            resumed_from: resumed_from.clone(),
            events_recorded: 0,
            operations_recorded: 0,
            last_event_id: None,
            inventory: InventorySummary::default(),
        };

        let mut parser = TransactionParser::new(source, self.options.zone);
        let mut pending: Option<PendingTransaction> = None;

        while let Some(record) = parser.next() {
            let record = record?;

            match record.label {
                Label::StartDate => {
                    let timestamp = parser.timestamp(&record)?;

                    // A transaction without End-Date ends at the next Start-Date
                    if let Some(txn) = pending.take() {
                        let event_id = self.commit(epoch, txn, &mut report)?;
                        if self.cap_reached(event_id, resume_id) {
                            break;
                        }
                    }

                    if self.state == ExtractionState::Seeking {
                        let last = resumed_from.as_ref().map(|e| e.timestamp.as_str());
                        if last.is_some_and(|last| timestamp.as_str() <= last) {
                            trace!("Skipping recorded transaction {}", timestamp);
                            continue;
                        }
                        self.transition(ExtractionState::Recording);
                    }

                    pending = Some(PendingTransaction::new(record.line, timestamp));
                }
                _ if self.state == ExtractionState::Seeking => {}
                Label::Operation(kind) => {
                    let Some(txn) = pending.as_mut() else {
                        return Err(Error::MalformedLine {
                            line: record.line,
                            reason: format!("{} outside of a transaction", kind),
                        });
                    };
                    let entries = parser.packages(&record, kind)?;
                    debug!("  {}: {} package(s)", kind, entries.len());
                    txn.operations
                        .extend(entries.into_iter().map(|entry| (kind, entry)));
                }
                Label::EndDate => {
                    let Some(txn) = pending.take() else {
                        continue;
                    };
                    let event_id = self.commit(epoch, txn, &mut report)?;
                    if self.cap_reached(event_id, resume_id) {
                        break;
                    }
                }
                Label::Other => {}
            }
        }

        if self.state != ExtractionState::Capped {
            if let Some(txn) = pending.take() {
                self.commit(epoch, txn, &mut report)?;
            }
            self.transition(ExtractionState::Done);
        }

        report.state = self.state;
        report.inventory = inventory::merge_installed(self.conn, self.options.os.as_deref())?;

        info!(
            events = report.events_recorded,
            operations = report.operations_recorded,
            state = %report.state,
            "Extraction finished"
        );
        Ok(report)
    }

    /// Enter `Capped` once the run has added `count` events
    fn cap_reached(&mut self, event_id: i64, resume_id: i64) -> bool {
        let limit = i64::from(self.options.count);
        if limit == 0 || event_id - resume_id < limit {
            return false;
        }

        self.log.notice(format_args!("added {} events", self.options.count));
        self.transition(ExtractionState::Capped);
        true
    }

    /// Write a log transaction as one event plus its operations, atomically
    fn commit(
        &mut self,
        epoch: u32,
        txn: PendingTransaction,
        report: &mut ExtractionReport,
    ) -> Result<i64> {
        let event_id = db::transaction(self.conn, |tx| {
            let mut event = Event::new(epoch, txn.timestamp.clone());
            let event_id = event.insert(tx)?;

            for (kind, entry) in &txn.operations {
                let mut operation =
                    PackageOperation::new(event_id, entry.package.clone(), entry.version.clone(), *kind);
                operation.architecture = entry.architecture.clone();
                operation.old_version = entry.old_version.clone();
                operation.automatic = entry.automatic;
                operation.insert(tx)?;
            }

            Ok(event_id)
        })?;

        info!(
            "Start-Date: {}, eid = {}, epoch = {} (line {}, {} operations)",
            txn.timestamp,
            event_id,
            epoch,
            txn.line,
            txn.operations.len()
        );

        report.events_recorded += 1;
        report.operations_recorded += txn.operations.len();
        report.last_event_id = Some(event_id);
        Ok(event_id)
    }
}
