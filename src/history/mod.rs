// src/history/mod.rs

//! Package-manager history log extraction
//!
//! - [`source`]: scoped, read-only access to the log contents
//! - [`parser`]: apt history grammar (labels, dates, package lists)
//! - [`extractor`]: the resumable extraction state machine

pub mod extractor;
pub mod parser;
pub mod source;

pub use extractor::{ExtractionEngine, ExtractionOptions, ExtractionReport, ExtractionState};
pub use parser::{PackageEntry, TimestampZone, TransactionParser};
pub use source::LogSource;
