mod common;

use reqprof::{Profiler, ProfilerConfig, ProfilerError, RequestInfo, Result};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn profiler_from_config_file() -> Result<()> {
    common::init_tracing();
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
retention_secs = 120
sweep_interval_secs = 0
trivial_threshold_ms = 0.25
capture_sql_stack = true
machine_name = "web-07"
user = "ops"
"#
    )?;

    let config = ProfilerConfig::load(file.path())?;
    assert_eq!(config.retention(), Duration::from_secs(120));
    assert!(config.capture_sql_stack);

    let profiler = Profiler::new(config)?;
    assert!(profiler.sweeper().is_none());
    let id = profiler
        .profile(&RequestInfo::new("GET", "localhost", "/"), || {
            reqprof::context::record_sql_event("select 1", 1.0)
        })
        .trace_id
        .unwrap();
    let doc = profiler.retrieve(id.as_str(), None)?.document;
    assert_eq!(doc.machine_name, "web-07");
    assert_eq!(doc.user, "ops");
    assert_eq!(doc.trivial_duration_threshold_milliseconds, 0.25);
    assert!(!doc.root.sql_timings[0].stack_trace_snippet.is_empty());
    Ok(())
}

#[test]
fn missing_file_is_io_error() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let err = ProfilerConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ProfilerError::Io(_)));
}

#[test]
fn malformed_file_is_config_error() -> Result<()> {
    common::init_tracing();
    let mut file = NamedTempFile::new()?;
    writeln!(file, "retention_secs = \"a day\"")?;
    assert!(matches!(
        ProfilerConfig::load(file.path()),
        Err(ProfilerError::Config(_))
    ));
    Ok(())
}

#[test]
fn second_subscriber_install_is_rejected() {
    common::init_tracing();
    let err = reqprof::logging::init_logging("reqprof=debug").unwrap_err();
    assert!(matches!(err, ProfilerError::InvalidArgument(_)));
    let err = reqprof::logging::init_logging("").unwrap_err();
    assert!(matches!(err, ProfilerError::InvalidArgument(_)));
}
