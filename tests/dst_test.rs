// tests/dst_test.rs

//! Resumption across a DST fall-back
//!
//! Runs in its own test binary since it sets `TZ` for the whole process.

use chrono::{Local, LocalResult, NaiveDateTime, TimeZone};
use std::io::Write;
use sw_collector::db;
use sw_collector::db::models::Event;
use sw_collector::history::{ExtractionEngine, ExtractionOptions, LogSource, TimestampZone};
use sw_collector::logging::LogConfig;
use tempfile::NamedTempFile;

#[test]
fn test_repeated_hour_is_not_recorded_twice() {
    // SAFETY: this binary holds a single test, so no other thread reads the
    // environment concurrently.
    unsafe { std::env::set_var("TZ", "Europe/Berlin") };

    let repeated = NaiveDateTime::parse_from_str("2024-10-27 02:10:00", "%Y-%m-%d %H:%M:%S").unwrap();
    if !matches!(Local.from_local_datetime(&repeated), LocalResult::Ambiguous(..)) {
        eprintln!("no zone data for Europe/Berlin, skipping");
        return;
    }

    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("collector.db").to_str().unwrap().to_string();
    db::init(&db_path).unwrap();

    // 02:50 CEST, then 02:10 CET once the clock went back
    let mut log = NamedTempFile::new().unwrap();
    log.write_all(
        b"Start-Date: 2024-10-27  02:50:00\n\
          Install: foo:amd64 (1.0)\n\
          End-Date: 2024-10-27  02:50:30\n\
          \n\
          Start-Date: 2024-10-27  02:10:00\n\
          Install: bar:amd64 (2.0)\n\
          End-Date: 2024-10-27  02:10:30\n",
    )
    .unwrap();
    log.flush().unwrap();

    let extract = || {
        let mut conn = db::open(&db_path).unwrap();
        let source = LogSource::open(log.path()).unwrap();
        let options = ExtractionOptions {
            count: 0,
            zone: TimestampZone::Local,
            os: None,
        };
        ExtractionEngine::new(&mut conn, options, LogConfig::new(1, true))
            .run(&source)
            .unwrap()
    };

    assert_eq!(extract().events_recorded, 2);
    assert_eq!(extract().events_recorded, 0);

    let conn = db::open(&db_path).unwrap();
    let timestamps: Vec<String> = Event::list_all(&conn)
        .unwrap()
        .into_iter()
        .map(|e| e.timestamp)
        .collect();
    assert_eq!(timestamps, vec!["2024-10-27T00:50:00Z", "2024-10-27T01:10:00Z"]);
}
