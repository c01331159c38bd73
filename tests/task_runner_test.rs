// Copyright 2025 Computational Memory Lab
// SPDX-License-Identifier: Apache-2.0

//! End-to-end runs of the `ramcontrol-task` binary against the mock host

use std::fs;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use ramcontrol::control::{MockHost, MockHostReport, MockHostSettings};
use tempfile::TempDir;

const TASK_BIN: &str = env!("CARGO_BIN_EXE_ramcontrol-task");

fn write_config(dir: &Path, address: &str) -> std::path::PathBuf {
    let path = dir.join("ramcontrol.toml");
    let log_dir = dir.join("logs");
    fs::write(
        &path,
        format!(
            r#"
[network]
address = "{address}"
connection_timeout_s = 1.0
heartbeat_interval_ms = 200

[logging]
level = "debug"
log_dir = "{}"
"#,
            log_dir.display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();
    path
}

fn spawn_task(config: &Path, extra: &[&str]) -> Child {
    Command::new(TASK_BIN)
        .arg("--config")
        .arg(config)
        .args(["--lists", "1", "--words-per-list", "2", "--word-ms", "20"])
        .args(extra)
        .env_remove("RAM_CONFIG")
        .env_remove("RAMCONTROL_NO_HOST")
        .env_remove("RAMCONTROL_ADDRESS")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

fn wait_for(mut child: Child, limit: Duration) -> ExitStatus {
    let began = Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if began.elapsed() > limit {
            child.kill().ok();
            panic!("task did not exit within {limit:?}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn run_host(address: &'static str, settings: MockHostSettings) -> thread::JoinHandle<MockHostReport> {
    thread::spawn(move || {
        let mut host = MockHost::connect(address, settings).unwrap();
        host.run(Duration::from_secs(30)).unwrap()
    })
}

#[test]
fn test_demo_session_completes() {
    let address = "tcp://127.0.0.1:31900";
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), address);

    let task = spawn_task(&config, &["--recall-ms", "50"]);
    let host = run_host(
        address,
        MockHostSettings {
            sync_rounds: 3,
            ..MockHostSettings::default()
        },
    );

    let status = wait_for(task, Duration::from_secs(30));
    let report = host.join().unwrap();

    assert!(status.success(), "task exited with {status}");
    assert!(report.exited);
    assert_eq!(report.clock_offsets.len(), 3);

    let kinds = report.kinds();
    for expected in ["EXPNAME", "SESSION", "DEFINE", "READY", "TRIAL", "MATH"] {
        assert!(kinds.contains(&expected), "missing {expected} in {kinds:?}");
    }
    assert_eq!(kinds.iter().filter(|k| **k == "WORD").count(), 2);
    assert_eq!(kinds.last(), Some(&"EXIT"));

    let run_folders: Vec<_> = fs::read_dir(dir.path().join("logs")).unwrap().collect();
    assert_eq!(run_folders.len(), 1);
}

#[test]
fn test_silent_host_makes_task_fail() {
    let address = "tcp://127.0.0.1:31901";
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), address);

    let task = spawn_task(&config, &["--skip-align", "--recall-ms", "10000"]);
    let host = run_host(
        address,
        MockHostSettings {
            echo_heartbeats: false,
            ..MockHostSettings::default()
        },
    );

    let status = wait_for(task, Duration::from_secs(30));
    let report = host.join().unwrap();

    assert_eq!(status.code(), Some(2));
    assert!(report.exited);
    assert!(!report.kinds().contains(&"ALIGNCLOCK"));
}

#[test]
fn test_no_host_mode_runs_alone() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "tcp://127.0.0.1:31902");

    let task = spawn_task(&config, &["--no-host", "--recall-ms", "10"]);
    let status = wait_for(task, Duration::from_secs(30));

    assert!(status.success(), "task exited with {status}");
}
