use std::io::Write;
use std::time::Duration;

use weft_core::config::WeftConfig;
use weft_core::error::WeftError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
max_depth = 4
default_max_parallelism = 2
run_timeout_secs = 90
strict_templates = true
event_capacity = 64

[tool_calls]
max_iterations = 6
timeout_per_tool_secs = 5
total_timeout_secs = 60

[expressions]
max_operations = 5000

[http]
timeout_secs = 10
user_agent = "weft-test"

[log]
filter = "weft=debug"

[workflows]
dir = "/srv/workflows"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = WeftConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_depth, 4);
    assert_eq!(config.engine.default_max_parallelism, 2);
    assert_eq!(config.engine.run_timeout(), Some(Duration::from_secs(90)));
    assert!(config.engine.strict_templates);
    assert_eq!(config.engine.event_capacity, 64);
    assert_eq!(config.tool_calls.max_iterations, 6);
    assert_eq!(config.tool_calls.timeout_per_tool_secs, 5);
    assert_eq!(config.tool_calls.total_timeout_secs, 60);
    assert_eq!(config.expressions.max_operations, 5000);
    assert_eq!(config.http.timeout_secs, 10);
    assert_eq!(config.http.user_agent, "weft-test");
    assert_eq!(config.log.filter, "weft=debug");
    assert_eq!(config.workflows_dir().to_str(), Some("/srv/workflows"));
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("WEFT_TEST_WORKFLOWS_DIR", "/opt/flows");

    let toml_content = r#"
[workflows]
dir = "${WEFT_TEST_WORKFLOWS_DIR}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = WeftConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.workflows.dir, "/opt/flows");

    std::env::remove_var("WEFT_TEST_WORKFLOWS_DIR");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_content = r#"
[engine]
max_depth = 3
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = WeftConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_depth, 3);
    assert_eq!(config.engine.default_max_parallelism, 4);
    assert!(config.engine.run_timeout().is_none());
    assert!(!config.engine.strict_templates);
    assert_eq!(config.tool_calls.max_iterations, 10);
    assert_eq!(config.tool_calls.total_timeout_secs, 300);
    assert_eq!(config.log.filter, "weft=info,warn");
    assert_eq!(config.workflows.dir, "./workflows");
}

#[test]
fn test_missing_file_is_reported() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = WeftConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, WeftError::ConfigNotFound(_)));
}

#[test]
fn test_malformed_toml_is_a_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine\nmax_depth = ").expect("write toml");

    let err = WeftConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, WeftError::Config(_)));
}
