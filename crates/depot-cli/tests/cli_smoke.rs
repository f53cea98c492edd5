use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use depot_core::checksum::crc32;

struct TempHome {
    path: PathBuf,
}

impl TempHome {
    fn new(name: &str) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock error")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "depot-cli-tests-{}-{}-{}",
            name,
            std::process::id(),
            timestamp
        ));
        fs::create_dir_all(&path).expect("failed to create temp HOME");
        Self { path }
    }

    fn db_path(&self) -> PathBuf {
        self.path.join("catalog.sqlite")
    }
}

impl Drop for TempHome {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn depot(home: &TempHome, args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_depot"));
    cmd.env("HOME", &home.path);
    cmd.arg("--db");
    cmd.arg(home.db_path());
    cmd.args(args);
    cmd.output().expect("failed to run depot")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "command failed\nstdout: {}\nstderr: {}",
        stdout(output),
        stderr(output)
    );
}

#[test]
fn add_show_list_remove_round_trip() {
    let home = TempHome::new("round-trip");
    assert_success(&depot(&home, &["init"]));

    let add = depot(
        &home,
        &[
            "add",
            "--name",
            "editor",
            "--version",
            "1.2.0",
            "--archive-path",
            "editor.zip",
            "--crc",
            "3735928559",
            "--description",
            "a fine editor",
            "--add-to-path",
        ],
    );
    assert_success(&add);
    assert!(stdout(&add).contains("id 1"), "stdout: {}", stdout(&add));

    let show = depot(&home, &["show", "1"]);
    assert_success(&show);
    let text = stdout(&show);
    assert!(text.contains("name: editor"));
    assert!(text.contains("version: 1.2.0"));
    assert!(text.contains("crc: 0xdeadbeef"));
    assert!(text.contains("add to path: true"));

    let list = depot(&home, &["list"]);
    assert_success(&list);
    assert!(stdout(&list).contains("editor"));

    assert_success(&depot(&home, &["remove", "1"]));
    let gone = depot(&home, &["show", "1"]);
    assert!(!gone.status.success());
    assert!(
        stderr(&gone).contains("no package with id 1"),
        "stderr: {}",
        stderr(&gone)
    );
}

#[test]
fn show_json_is_machine_readable() {
    let home = TempHome::new("json");
    assert_success(&depot(&home, &["init"]));
    assert_success(&depot(
        &home,
        &[
            "add",
            "--name",
            "tool",
            "--version",
            "0.1",
            "--archive-path",
            "tool.tar.gz",
            "--crc",
            "42",
        ],
    ));
    let show = depot(&home, &["show", "1", "--json"]);
    assert_success(&show);
    let value: serde_json::Value =
        serde_json::from_str(&stdout(&show)).expect("show --json did not emit json");
    assert_eq!(value["name"], "tool");
    assert_eq!(value["crc"], 42);
}

#[test]
fn verify_reports_corruption_distinctly() {
    let home = TempHome::new("verify");
    assert_success(&depot(&home, &["init"]));

    let archive = home.path.join("pkg.tar.gz");
    let bytes = b"pretend this is a tarball";
    fs::write(&archive, bytes).unwrap();

    assert_success(&depot(
        &home,
        &[
            "add",
            "--name",
            "pkg",
            "--version",
            "1.0",
            "--archive-path",
            "pkg.tar.gz",
            "--crc",
            &crc32(bytes).to_string(),
        ],
    ));

    let ok = depot(&home, &["verify", "1", archive.to_str().unwrap()]);
    assert_success(&ok);
    assert!(stdout(&ok).contains("matches the stored checksum"));

    fs::write(&archive, b"corrupted on the wire").unwrap();
    let bad = depot(&home, &["verify", "1", archive.to_str().unwrap()]);
    assert!(!bad.status.success());
    assert!(
        stderr(&bad).contains("checksum mismatch"),
        "stderr: {}",
        stderr(&bad)
    );
}

#[test]
fn legacy_catalog_migrates_and_relaxes_uniqueness() {
    let home = TempHome::new("migrate");
    assert_success(&depot(&home, &["init", "--legacy"]));

    let add = |name: &str| {
        depot(
            &home,
            &[
                "add",
                "--name",
                name,
                "--version",
                "1.0",
                "--archive-path",
                "dup.tar.gz",
                "--crc",
                "7",
            ],
        )
    };
    assert_success(&add("dup"));
    let conflict = add("dup");
    assert!(!conflict.status.success());
    assert!(
        stderr(&conflict).contains("already exists"),
        "stderr: {}",
        stderr(&conflict)
    );

    assert_success(&depot(&home, &["migrate", "--to", "2"]));
    let status = depot(&home, &["status"]);
    assert_success(&status);
    assert!(stdout(&status).contains("schema version: 2"));

    // duplicates are allowed after the upgrade
    assert_success(&add("dup"));
    let find = depot(&home, &["find", "dup"]);
    assert!(!find.status.success());
    assert!(
        stderr(&find).contains("packages named dup"),
        "stderr: {}",
        stderr(&find)
    );
}

#[test]
fn set_updates_and_clears_fields() {
    let home = TempHome::new("set");
    assert_success(&depot(&home, &["init"]));
    assert_success(&depot(
        &home,
        &[
            "add",
            "--name",
            "app",
            "--version",
            "1.0",
            "--archive-path",
            "app.tar.gz",
            "--crc",
            "9",
            "--description",
            "old words",
        ],
    ));

    assert_success(&depot(
        &home,
        &["set", "1", "--version", "2.0", "--clear-description"],
    ));
    let show = depot(&home, &["show", "1"]);
    assert_success(&show);
    let text = stdout(&show);
    assert!(text.contains("version: 2.0"));
    assert!(!text.contains("description:"));

    let empty = depot(&home, &["set", "1"]);
    assert!(!empty.status.success());
    assert!(stderr(&empty).contains("nothing to change"));
}
