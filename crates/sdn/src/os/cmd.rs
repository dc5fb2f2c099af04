use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::process::Command;

use crate::items::MAIN_NS;
use crate::{Error, Result};

/// Runs external tools (`ip`, `iptables`, `tc`, `sysctl`, ...), optionally
/// inside a named network namespace.
///
/// A recording runner does not execute anything; it remembers the command
/// lines, which is how configurators are tested without root.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    recorded: Option<Arc<Mutex<Vec<String>>>>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recording() -> Self {
        Self {
            recorded: Some(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// Command lines seen by a recording runner.
    pub fn recorded(&self) -> Vec<String> {
        self.recorded
            .as_ref()
            .map(|r| r.lock().unwrap_or_else(|p| p.into_inner()).clone())
            .unwrap_or_default()
    }

    /// Full argv, wrapped in `ip netns exec` outside the main namespace.
    pub fn command_line<I, S>(netns: &str, program: &str, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut argv = Vec::new();
        if netns != MAIN_NS {
            argv.extend(["ip", "netns", "exec", netns].map(String::from));
        }
        argv.push(program.to_string());
        argv.extend(args.into_iter().map(|a| a.as_ref().to_string()));
        argv
    }

    /// Run a command to completion and return its stdout.
    pub async fn run<I, S>(&self, netns: &str, program: &str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let argv = Self::command_line(netns, program, args);
        let cmd_line = argv.join(" ");
        tracing::debug!(cmd = %cmd_line, "running command");

        if let Some(recorded) = &self.recorded {
            recorded
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(cmd_line);
            return Ok(String::new());
        }

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .output()
            .await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let text = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };
        Err(Error::Command {
            cmd: cmd_line,
            status: output.status.to_string(),
            output: text,
        })
    }

    /// Like [`run`](Self::run), but a "does not exist" failure is not an error.
    pub async fn run_ignore_missing<I, S>(&self, netns: &str, program: &str, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self.run(netns, program, args).await {
            Err(e) if e.is_not_found() => {
                tracing::debug!(error = %e, "ignoring missing object");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        assert_eq!(
            CommandRunner::command_line("main", "sysctl", ["-w", "net.ipv4.ip_forward=1"]),
            ["sysctl", "-w", "net.ipv4.ip_forward=1"]
        );
        assert_eq!(
            CommandRunner::command_line("network-lan", "iptables", ["-t", "nat", "-L"]),
            ["ip", "netns", "exec", "network-lan", "iptables", "-t", "nat", "-L"]
        );
    }

    #[tokio::test]
    async fn test_recording_runner() {
        let runner = CommandRunner::recording();
        runner.run("endpoint-x", "ip", ["link", "show"]).await.unwrap();
        assert_eq!(runner.recorded(), ["ip netns exec endpoint-x ip link show"]);
    }

    #[tokio::test]
    async fn test_run_reports_failure() {
        let runner = CommandRunner::new();
        let out = runner.run("main", "sh", ["-c", "echo hello"]).await.unwrap();
        assert_eq!(out, "hello\n");

        let err = runner
            .run("main", "sh", ["-c", "echo 'No such device' >&2; exit 2"])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("No such device"));

        runner
            .run_ignore_missing("main", "sh", ["-c", "echo 'Cannot find device' >&2; exit 1"])
            .await
            .unwrap();
    }
}
