//! Helpers for running the `capivara-watcher` binary
//!
//! `WatcherCommand` runs the binary to completion (for invocations that exit
//! on their own); `LiveWatcher` keeps it running and exposes its stdout line
//! by line.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const BINARY: &str = env!("CARGO_BIN_EXE_capivara-watcher");

/// CLI command builder with timing
pub struct WatcherCommand {
    working_dir: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl WatcherCommand {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            args: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    /// Run to completion; the process is killed once `timeout` passes
    pub fn execute(&self) -> Result<CommandResult> {
        let start = Instant::now();
        let mut child = Command::new(BINARY)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn capivara-watcher")?;

        loop {
            if child.try_wait()?.is_some() {
                break;
            }
            if start.elapsed() > self.timeout {
                child.kill()?;
                anyhow::bail!("Command timed out after {:?}: {:?}", self.timeout, self.args);
            }
            thread::sleep(Duration::from_millis(20));
        }

        let output = child
            .wait_with_output()
            .context("Failed to wait for command")?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }
}

/// Command execution result with timing
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn contains_stdout(&self, text: &str) -> bool {
        self.stdout.contains(text)
    }

    pub fn contains_stderr(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }
}

/// A running watcher whose stdout is read on a background thread
pub struct LiveWatcher {
    child: Child,
    lines: mpsc::Receiver<String>,
    seen: Vec<String>,
}

impl LiveWatcher {
    pub fn spawn(args: &[&str]) -> Result<Self> {
        let mut child = Command::new(BINARY)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn capivara-watcher")?;

        let stdout = child.stdout.take().context("stdout not captured")?;
        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            child,
            lines,
            seen: Vec::new(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Block until a stdout line contains `needle`
    pub fn wait_for_line(&mut self, needle: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = self.lines.recv_timeout(remaining).with_context(|| {
                format!("No line containing {:?}; saw {:#?}", needle, self.seen)
            })?;
            self.seen.push(line.clone());
            if line.contains(needle) {
                return Ok(line);
            }
        }
    }

    /// Wait for exit, killing the process if it outlives `timeout`
    pub fn wait(&mut self, timeout: Duration) -> Result<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() > deadline {
                self.child.kill()?;
                anyhow::bail!("capivara-watcher did not exit within {:?}", timeout);
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    /// Remaining stdout after exit
    pub fn drain(&mut self) -> Vec<String> {
        let rest: Vec<String> = self.lines.try_iter().collect();
        self.seen.extend(rest.iter().cloned());
        rest
    }
}

impl Drop for LiveWatcher {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Convenient command construction
///
/// ```ignore
/// capivara!(dir, "--help").execute()?;
/// ```
#[macro_export]
macro_rules! capivara {
    ($dir:expr $(, $arg:expr)*) => {{
        let mut cmd = $crate::common::cli::WatcherCommand::new($dir);
        cmd.args(&[$($arg),*]);
        cmd
    }};
}
