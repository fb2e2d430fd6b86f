use std::process::Command;

fn bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_spindle-ctl")
}

#[test]
fn simulated_run_journals_energized_spindle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = dir.path().join("status.jsonl");

    let status = Command::new(bin_path())
        .args(["--run-seconds", "3", "--journal"])
        .arg(&journal)
        .status()
        .expect("Failed to start spindle-ctl");
    assert!(status.success());

    let content = std::fs::read_to_string(&journal).expect("journal written");
    let entries: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).expect("journal line is JSON"))
        .collect();

    let has = |field: &str, pred: &dyn Fn(&serde_json::Value) -> bool| {
        entries
            .iter()
            .any(|e| e["field"] == field && pred(&e["value"]))
    };
    assert!(has("main_power", &|v| v == &serde_json::Value::Bool(true)));
    assert!(has("direction_forward", &|v| v == &serde_json::Value::Bool(true)));
    assert!(has("engine_energized", &|v| v == &serde_json::Value::Bool(true)));
    assert!(has("rpm", &|v| v.as_f64().unwrap_or(0.0) > 0.0));
}

#[test]
fn rejects_unknown_capture_mode() {
    let status = Command::new(bin_path())
        .args(["--capture", "dma"])
        .status()
        .expect("Failed to start spindle-ctl");
    assert!(!status.success());
}

#[test]
fn rejects_invalid_tuning_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tuning = dir.path().join("tuning.json");
    std::fs::write(&tuning, r#"{"debounce_ms": "fast"}"#).expect("write tuning");

    let status = Command::new(bin_path())
        .args(["--run-seconds", "1", "--tuning"])
        .arg(&tuning)
        .status()
        .expect("Failed to start spindle-ctl");
    assert!(!status.success());
}
