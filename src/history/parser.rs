// src/history/parser.rs

//! apt history log grammar
//!
//! A history log is a sequence of `Label: value` lines. Transactions open
//! with `Start-Date`, close with `End-Date`, and carry package lists in
//! between:
//!
//! ```text
//! Start-Date: 2024-01-01  01:00:00
//! Commandline: apt-get install foo
//! Install: foo:amd64 (1.0), libbar:amd64 (2.0, automatic)
//! Upgrade: baz:amd64 (1.1, 1.2)
//! End-Date: 2024-01-01  01:00:05
//! ```

use super::source::{LogSource, Lines};
use crate::db::models::OperationKind;
use crate::error::{Error, Result};
use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Separator between a label and its value
const LABEL_SEPARATOR: char = ':';

/// Layout of a history date after whitespace normalization
const HISTORY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Canonical event timestamp layout (RFC 3339, UTC, seconds)
const EVENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Zone the history log's wall-clock dates are written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampZone {
    /// System local time (what apt writes)
    #[default]
    Local,
    Utc,
}

/// Recognized line labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    StartDate,
    EndDate,
    Operation(OperationKind),
    /// Anything else (`Commandline`, `Requested-By`, `Error`, ...)
    Other,
}

impl Label {
    fn from_name(name: &str) -> Self {
        match name {
            "Start-Date" => Label::StartDate,
            "End-Date" => Label::EndDate,
            "Install" => Label::Operation(OperationKind::Install),
            "Upgrade" => Label::Operation(OperationKind::Upgrade),
            "Remove" => Label::Operation(OperationKind::Remove),
            "Purge" => Label::Operation(OperationKind::Purge),
            _ => Label::Other,
        }
    }
}

/// One non-blank log line split into label and value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub line: usize,
    pub label: Label,
    pub value: String,
}

/// A package named in an operation list
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageEntry {
    pub package: String,
    pub architecture: Option<String>,
    pub version: Option<String>,
    pub old_version: Option<String>,
    pub automatic: bool,
}

/// Streams [`Record`]s out of a history log
pub struct TransactionParser<'a> {
    lines: Lines<'a>,
    zone: TimestampZone,
    /// Instant of the last `Start-Date` parsed
    previous: Option<DateTime<Utc>>,
}

impl<'a> TransactionParser<'a> {
    pub fn new(source: &'a LogSource, zone: TimestampZone) -> Self {
        Self {
            lines: source.lines(),
            zone,
            previous: None,
        }
    }

    /// Parse a `Start-Date` value into a canonical event timestamp
    ///
    /// A local time repeated by a DST fall-back resolves to the later
    /// instant when the earlier one would precede the previous `Start-Date`.
    pub fn timestamp(&mut self, record: &Record) -> Result<String> {
        let instant = parse_instant(record.line, &record.value, self.zone, self.previous)?;
        self.previous = Some(instant);
        Ok(instant.format(EVENT_TIME_FORMAT).to_string())
    }

    /// Parse the package list of an operation record
    pub fn packages(&self, record: &Record, kind: OperationKind) -> Result<Vec<PackageEntry>> {
        parse_packages(record.line, &record.value, kind)
    }
}

impl Iterator for TransactionParser<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        for (line_no, line) in self.lines.by_ref() {
            if line.trim().is_empty() {
                continue;
            }
            return Some(split_label(line_no, &line).map(|(name, value)| Record {
                line: line_no,
                label: Label::from_name(name),
                value: value.to_string(),
            }));
        }
        None
    }
}

/// Split a line on the first label separator
///
/// Both halves are trimmed. A line without separator is malformed.
pub fn split_label(line_no: usize, line: &str) -> Result<(&str, &str)> {
    line.split_once(LABEL_SEPARATOR)
        .map(|(label, value)| (label.trim(), value.trim()))
        .ok_or_else(|| Error::MalformedLine {
            line: line_no,
            reason: format!("terminator symbol '{}' not found", LABEL_SEPARATOR),
        })
}

/// Convert `YYYY-MM-DD  HH:MM:SS` in `zone` to an RFC 3339 UTC timestamp
pub fn parse_timestamp(line_no: usize, value: &str, zone: TimestampZone) -> Result<String> {
    let instant = parse_instant(line_no, value, zone, None)?;
    Ok(instant.format(EVENT_TIME_FORMAT).to_string())
}

/// Convert a history date to an instant, not before `floor` if avoidable
fn parse_instant(
    line_no: usize,
    value: &str,
    zone: TimestampZone,
    floor: Option<DateTime<Utc>>,
) -> Result<DateTime<Utc>> {
    let invalid = || Error::TimestampParse {
        line: line_no,
        value: value.to_string(),
    };

    let mut parts = value.split_whitespace();
    let (Some(date), Some(time), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    if date.len() != 10 || time.len() != 8 {
        return Err(invalid());
    }

    let naive = NaiveDateTime::parse_from_str(&format!("{} {}", date, time), HISTORY_TIME_FORMAT)
        .map_err(|_| invalid())?;

    match zone {
        TimestampZone::Utc => Ok(naive.and_utc()),
        TimestampZone::Local => {
            resolve_local(Local.from_local_datetime(&naive), floor).ok_or_else(invalid)
        }
    }
}

/// Pick the instant of a local time
///
/// Ambiguous times take the earlier instant unless it lies before `floor`.
/// Times skipped by a DST spring-forward have no instant.
fn resolve_local<Tz: TimeZone>(
    local: LocalResult<DateTime<Tz>>,
    floor: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match local {
        LocalResult::Single(instant) => Some(instant.with_timezone(&Utc)),
        LocalResult::Ambiguous(earlier, later) => {
            let earlier = earlier.with_timezone(&Utc);
            if floor.is_some_and(|floor| earlier < floor) {
                Some(later.with_timezone(&Utc))
            } else {
                Some(earlier)
            }
        }
        LocalResult::None => None,
    }
}

/// Parse a package list such as `foo:amd64 (1.0), bar (1.1, 1.2), baz:2.0`
///
/// Install and Upgrade entries must carry a version; Remove and Purge may
/// omit it.
pub fn parse_packages(line_no: usize, value: &str, kind: OperationKind) -> Result<Vec<PackageEntry>> {
    let malformed = |reason: String| Error::MalformedLine {
        line: line_no,
        reason,
    };

    let mut entries = Vec::new();
    let mut rest = value.trim();

    while !rest.is_empty() {
        let (head, inner, tail) = match rest.find(['(', ',']) {
            Some(open) if rest[open..].starts_with('(') => {
                let close = rest[open..]
                    .find(')')
                    .map(|offset| open + offset)
                    .ok_or_else(|| malformed(format!("unclosed '(' in '{}'", rest)))?;
                (&rest[..open], Some(&rest[open + 1..close]), &rest[close + 1..])
            }
            Some(comma) => (&rest[..comma], None, &rest[comma + 1..]),
            None => (rest, None, ""),
        };

        let mut tokens: Vec<&str> = head.split_whitespace().collect();
        if let Some(token) = tokens.iter().find(|t| t.contains(')')) {
            return Err(malformed(format!("unexpected ')' in '{}'", token)));
        }

        let owner = match inner {
            Some(inner) => {
                let owner = tokens
                    .pop()
                    .ok_or_else(|| malformed(format!("version '({})' without package", inner)))?;
                Some((owner, inner))
            }
            None => None,
        };

        for token in tokens {
            entries.push(bare_entry(token));
        }
        if let Some((owner, inner)) = owner {
            entries.push(versioned_entry(owner, inner).map_err(malformed)?);
        }

        rest = tail.trim_start().trim_start_matches(',').trim_start();
    }

    for entry in &entries {
        if entry.package.is_empty() {
            return Err(malformed("empty package name".to_string()));
        }
        if !kind.removes() && entry.version.is_none() {
            return Err(malformed(format!(
                "{} of '{}' without version",
                kind, entry.package
            )));
        }
    }

    Ok(entries)
}

/// `name:version` or `name`
fn bare_entry(token: &str) -> PackageEntry {
    match token.split_once(':') {
        Some((package, version)) if !version.is_empty() => PackageEntry {
            package: package.to_string(),
            version: Some(version.to_string()),
            ..Default::default()
        },
        _ => PackageEntry {
            package: token.trim_end_matches(':').to_string(),
            ..Default::default()
        },
    }
}

/// `name[:arch] (version[, new_version][, automatic])`
fn versioned_entry(owner: &str, inner: &str) -> std::result::Result<PackageEntry, String> {
    let (package, architecture) = match owner.split_once(':') {
        Some((package, arch)) if !arch.is_empty() => (package, Some(arch.to_string())),
        _ => (owner.trim_end_matches(':'), None),
    };

    let mut automatic = false;
    let mut versions = Vec::new();
    for part in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if part == "automatic" {
            automatic = true;
        } else {
            versions.push(part.to_string());
        }
    }

    let (old_version, version) = match versions.len() {
        0 => (None, None),
        1 => (None, versions.pop()),
        2 => {
            let new = versions.pop();
            (versions.pop(), new)
        }
        _ => return Err(format!("too many versions for '{}': ({})", package, inner)),
    };

    Ok(PackageEntry {
        package: package.to_string(),
        architecture,
        version,
        old_version,
        automatic,
    })
}
