//! Command routing against a workspace on disk

use super::test_utils::{with_isolated_home, MANIFEST};
use confstack::cli::{map_error, Commands, RunContext};
use confstack::{ApiError, ErrorKind};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SETTINGS: &str = r#"
[engine]
schema = "schema.toml"

[[engine.levels]]
name = "machine"
path = "machine.config"

[[engine.levels]]
name = "app"
path = "app/web.config"
"#;

const MACHINE: &str = r#"<configuration>
  <appSettings>
    <add key="a" value="1"/>
  </appSettings>
  <session timeout="45" lockAttributes="timeout"/>
</configuration>
"#;

const APP: &str = r#"<configuration>
  <appSettings>
    <add key="b" value="2"/>
  </appSettings>
</configuration>
"#;

fn workspace(temp_dir: &TempDir, app: Option<&str>) -> PathBuf {
    let root = temp_dir.path().join("workspace");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("schema.toml"), MANIFEST).unwrap();
    fs::write(root.join("confstack.toml"), SETTINGS).unwrap();
    fs::write(root.join("machine.config"), MACHINE).unwrap();
    if let Some(app) = app {
        fs::create_dir_all(root.join("app")).unwrap();
        fs::write(root.join("app/web.config"), app).unwrap();
    }
    root
}

fn run(temp_dir: &TempDir, root: &Path, command: Commands) -> Result<String, ApiError> {
    with_isolated_home(&temp_dir.path().join("home"), || {
        RunContext::new(root.to_path_buf(), None)?.execute(&command)
    })
}

fn set(edit: &str, write: bool) -> Commands {
    Commands::Set {
        edits: vec![edit.parse().unwrap()],
        mode: None,
        write,
    }
}

#[test]
fn test_resolve_prints_effective_top_level() {
    let temp_dir = TempDir::new().unwrap();
    let root = workspace(&temp_dir, Some(APP));
    let output = run(&temp_dir, &root, Commands::Resolve { level: None }).unwrap();
    assert!(output.contains("key=\"a\""), "{}", output);
    assert!(output.contains("key=\"b\""), "{}", output);
    assert!(output.contains("mode=\"InProc\""), "{}", output);
}

#[test]
fn test_resolve_named_level() {
    let temp_dir = TempDir::new().unwrap();
    let root = workspace(&temp_dir, Some(APP));
    let output = run(
        &temp_dir,
        &root,
        Commands::Resolve {
            level: Some("machine".to_string()),
        },
    )
    .unwrap();
    assert!(output.contains("timeout=\"45\""), "{}", output);
    assert!(!output.contains("key=\"b\""), "{}", output);

    let err = run(
        &temp_dir,
        &root,
        Commands::Resolve {
            level: Some("site".to_string()),
        },
    )
    .unwrap_err();
    assert!(matches!(err, ApiError::ConfigError(_)));
}

#[test]
fn test_check_reports_ok_and_problems() {
    let temp_dir = TempDir::new().unwrap();
    let root = workspace(&temp_dir, Some(APP));
    let output = run(&temp_dir, &root, Commands::Check).unwrap();
    assert_eq!(output, "OK: 2 level(s) checked");

    fs::write(
        root.join("app/web.config"),
        "<configuration>\n  <session timeout=\"90\" colour=\"red\"/>\n</configuration>\n",
    )
    .unwrap();
    let err = run(&temp_dir, &root, Commands::Check).unwrap_err();
    let message = map_error(&err);
    assert!(message.starts_with("2 problem(s) found"), "{}", message);
    assert!(message.contains("timeout"), "{}", message);
    assert!(message.contains("colour"), "{}", message);
}

#[test]
fn test_set_prints_delta_without_writing() {
    let temp_dir = TempDir::new().unwrap();
    let root = workspace(&temp_dir, Some(APP));
    let output = run(&temp_dir, &root, set("appSettings/add[c]@value=3", false)).unwrap();
    assert!(output.contains("<add key=\"c\" value=\"3\"/>"), "{}", output);
    assert!(output.contains("key=\"b\""), "{}", output);
    assert!(!output.contains("key=\"a\""), "{}", output);
    assert_eq!(fs::read_to_string(root.join("app/web.config")).unwrap(), APP);
}

#[test]
fn test_set_with_write_creates_missing_level() {
    let temp_dir = TempDir::new().unwrap();
    let root = workspace(&temp_dir, None);
    run(&temp_dir, &root, set("session@mode=Off", true)).unwrap();

    let written = fs::read_to_string(root.join("app/web.config")).unwrap();
    assert!(written.contains("<session mode=\"Off\"/>"), "{}", written);
    assert!(!written.contains("appSettings"), "{}", written);

    let output = run(&temp_dir, &root, Commands::Resolve { level: None }).unwrap();
    assert!(output.contains("mode=\"Off\""), "{}", output);
}

#[test]
fn test_set_unchanged_value_reports_no_changes() {
    let temp_dir = TempDir::new().unwrap();
    let root = workspace(&temp_dir, None);
    let output = run(&temp_dir, &root, set("session@mode=InProc", false)).unwrap();
    assert_eq!(output, "(no changes)");
}

#[test]
fn test_set_locked_attribute_fails() {
    let temp_dir = TempDir::new().unwrap();
    let root = workspace(&temp_dir, Some(APP));
    let err = run(&temp_dir, &root, set("session@timeout=90", false)).unwrap_err();
    assert!(matches!(&err, ApiError::Engine(e) if e.kind() == ErrorKind::LockViolation));
}

#[test]
fn test_schema_lists_lockable_names() {
    let temp_dir = TempDir::new().unwrap();
    let root = workspace(&temp_dir, None);
    let output = run(&temp_dir, &root, Commands::Schema).unwrap();
    assert!(output.contains("configuration (root)"), "{}", output);
    assert!(output.contains("  attributes: timeout, mode"), "{}", output);
    assert!(output.contains("  elements: add, remove, clear"), "{}", output);
}

#[test]
fn test_missing_schema_setting_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("workspace");
    fs::create_dir_all(&root).unwrap();
    let err = run(&temp_dir, &root, Commands::Check).unwrap_err();
    match err {
        ApiError::ConfigError(message) => assert!(message.contains("engine.schema"), "{}", message),
        other => panic!("unexpected {:?}", other),
    }
}
