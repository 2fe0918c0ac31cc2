use std::fs;
use std::process::Command;

fn contagion() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_contagion"));
    cmd.env("RUST_LOG", "off");
    cmd
}

#[test]
fn headless_run_prints_a_report() {
    let output = contagion()
        .args([
            "--healthy",
            "80",
            "--infected",
            "4",
            "--ticks",
            "30",
            "--workers",
            "2",
            "--report-every",
            "10",
        ])
        .output()
        .expect("failed to run contagion binary");
    assert!(output.status.success(), "headless run failed");

    let stdout = String::from_utf8(output.stdout).expect("utf8 stdout");
    let report: serde_json::Value = serde_json::from_str(stdout.trim()).expect("json report");
    assert_eq!(report["ticks_completed"], 30);
    assert_eq!(report["commands_applied"], 2);
    assert_eq!(report["commands_rejected"], 0);
    let healthy = report["healthy"].as_i64().expect("healthy");
    let infected = report["infected"].as_i64().expect("infected");
    assert_eq!(healthy + infected, 84);
}

#[test]
fn frame_out_writes_colored_sprites() {
    let path = std::env::temp_dir().join(format!("contagion-frame-{}.json", std::process::id()));
    let status = contagion()
        .args(["--healthy", "10", "--infected", "2", "--ticks", "5"])
        .arg("--frame-out")
        .arg(&path)
        .status()
        .expect("failed to run contagion binary");
    assert!(status.success());

    let raw = fs::read_to_string(&path).expect("frame written");
    let _ = fs::remove_file(&path);
    let frame: serde_json::Value = serde_json::from_str(&raw).expect("frame json");
    assert_eq!(frame["sprites"].as_array().map(Vec::len), Some(12));
    assert_eq!(frame["tick"], 5);
}

#[test]
fn out_of_range_probability_is_rejected() {
    let status = contagion()
        .args(["--probability", "1.5", "--ticks", "1"])
        .status()
        .expect("failed to run contagion binary");
    assert!(!status.success());
}
