//! Supervised daemon processes.
//!
//! Every daemon run by the agent (dnsmasq, radvd, dhcpcd, httpsrv, goproxy)
//! writes a pid file. Starting waits until that pid file names a live
//! process; stopping sends SIGTERM and waits until the process is gone. Both
//! are bounded by a timeout and polled at a fixed interval.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::Instant;

use crate::os::CommandRunner;
use crate::{Error, Result};

pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SupervisedProcess {
    pub binary: String,
    pub args: Vec<String>,
    pub netns: String,
    pub pid_file: PathBuf,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    pub poll_interval: Duration,
    /// Keep the process running in the background. Otherwise the command
    /// is expected to daemonize itself and `start` waits for it to exit.
    pub background: bool,
}

impl SupervisedProcess {
    pub fn new(binary: impl Into<String>, netns: impl Into<String>, pid_file: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            netns: netns.into(),
            pid_file: pid_file.into(),
            start_timeout: DEFAULT_START_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            background: false,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// Start the process and wait until its pid file names a live process.
    pub async fn start(&self) -> Result<()> {
        let argv = CommandRunner::command_line(&self.netns, &self.binary, &self.args);
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).stdin(Stdio::null());
        tracing::debug!(cmd = %argv.join(" "), background = self.background, "starting process");

        if self.background {
            let mut child = cmd.stdout(Stdio::null()).stderr(Stdio::null()).spawn()?;
            // Reap the child once it exits.
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        } else {
            let output = cmd.output().await?;
            if !output.status.success() {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                return Err(Error::Command {
                    cmd: argv.join(" "),
                    status: output.status.to_string(),
                    output: text.trim().to_string(),
                });
            }
        }

        self.wait_for(true, self.start_timeout).await
    }

    /// Send SIGTERM and wait until the process is gone.
    pub async fn stop(&self) -> Result<()> {
        let Some(pid) = self.pid() else {
            return Ok(());
        };
        // SAFETY: kill(2) with a pid read from the pid file; no memory is shared.
        let ret = unsafe { libc::kill(pid, libc::SIGTERM) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            return Err(err.into());
        }
        self.wait_for(false, self.stop_timeout).await
    }

    /// Wait, up to the stop timeout, for a process asked to exit by other means.
    pub async fn wait_stopped(&self) -> Result<()> {
        self.wait_for(false, self.stop_timeout).await
    }

    /// PID from the pid file, if it exists and parses.
    pub fn pid(&self) -> Option<i32> {
        let content = std::fs::read_to_string(&self.pid_file).ok()?;
        content.trim().parse().ok().filter(|pid| *pid > 0)
    }

    pub fn is_running(&self) -> bool {
        self.pid().is_some_and(process_alive)
    }

    async fn wait_for(&self, running: bool, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_running() == running {
                return Ok(());
            }
            if Instant::now() >= deadline {
                let what = if running { "start of" } else { "stop of" };
                return Err(Error::Timeout {
                    what: format!("{what} {}", self.binary),
                    after: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 only checks that the process exists.
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
