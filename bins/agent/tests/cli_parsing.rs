//! CLI argument parsing tests for sdnagent.
//!
//! Only flags that make the binary exit before touching the host are used.

use assert_cmd::Command;
use predicates::prelude::*;

fn sdnagent_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sdnagent"))
}

#[test]
fn test_help() {
    sdnagent_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("declarative network model"))
        .stdout(predicate::str::contains("--refresh-interval"))
        .stdout(predicate::str::contains("[default: 6666]"));
}

#[test]
fn test_version() {
    sdnagent_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sdnagent"));
}

#[test]
fn test_invalid_port() {
    sdnagent_cmd()
        .args(["--port", "70000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--port"));
}

#[test]
fn test_invalid_ip() {
    sdnagent_cmd()
        .args(["--ip", "not-an-ip"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid"));
}

#[test]
fn test_zero_refresh_interval() {
    sdnagent_cmd()
        .args(["--refresh-interval", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--refresh-interval"));
}

#[test]
fn test_unknown_flag() {
    sdnagent_cmd()
        .arg("--bogus")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}
