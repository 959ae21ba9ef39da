use std::process::Command;
use tempfile::NamedTempFile;

fn gkos_scope() -> Command {
    Command::new(env!("CARGO_BIN_EXE_gkos-scope"))
}

#[test]
fn test_demo_prints_table() {
    let output = gkos_scope().args(["--demo", "gkv3"]).output().expect("binary runs");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let header = stdout.lines().next().unwrap_or_default();
    assert!(header.starts_with("ID"), "{header}");
    assert!(header.contains("Core"));
    assert!(stdout.contains("gui_main"));
    assert!(stdout.contains("exec core 0"));
}

#[test]
fn test_demo_export_is_json() {
    let export = NamedTempFile::new().unwrap();
    let output = gkos_scope()
        .args(["--demo", "gkv4", "--quiet", "--updates", "2", "--export"])
        .arg(export.path())
        .output()
        .expect("binary runs");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(output.stdout.is_empty());

    let bytes = std::fs::read(export.path()).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["generation"], "gkv4");
    assert_eq!(value["snapshots"].as_array().map(Vec::len), Some(2));
}

#[test]
fn test_dump_without_generation_is_usage_error() {
    let dump = NamedTempFile::new().unwrap();
    std::fs::write(dump.path(), "{}").unwrap();
    let output = gkos_scope().arg("--image").arg(dump.path()).output().expect("binary runs");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_dump_without_scheduler_fails() {
    let dump = NamedTempFile::new().unwrap();
    std::fs::write(dump.path(), r#"{"generation": "gk"}"#).unwrap();
    let output = gkos_scope().arg("--image").arg(dump.path()).output().expect("binary runs");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no scheduler symbol"));
}

#[test]
fn test_missing_arguments_exit_with_usage() {
    let output = gkos_scope().output().expect("binary runs");
    assert_eq!(output.status.code(), Some(2));
}
