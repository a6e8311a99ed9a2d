//! External command execution utilities.
//!
//! Provides a Builder-based API for running the external collaborators a
//! session is configured with (markup generator, evaluator), with stdin
//! piping and cooperative cancellation.
//!
//! # Examples
//!
//! ```ignore
//! use crate::utils::exec::Cmd;
//!
//! // Configured command array with placeholders already substituted
//! Cmd::from_slice(&["xamlg", "MainPage.xaml", "-o", "MainPage.xaml.g.cs"]).run()?;
//!
//! // Pipe an emitted unit to an evaluator, stopping when cancelled
//! let output = Cmd::from_slice(&config.evaluator.command)
//!     .stdin(source)
//!     .run_until(|| token.is_cancelled())?;
//! ```

use crate::log;
use anyhow::{Context, Result};
use regex::Regex;
use std::{
    ffi::{OsStr, OsString},
    io::{Read, Write},
    process::{Child, Command, Output, Stdio},
    sync::LazyLock,
    thread::JoinHandle,
    time::Duration,
};

/// Poll interval while waiting on a cancellable child.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Builder API
// ============================================================================

/// Command builder for external process execution.
#[derive(Default)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    stdin_data: Option<Vec<u8>>,
}

impl Cmd {
    /// Create from a command array (e.g., `["xamlg"]` or `["dotnet", "script", "-"]`).
    pub fn from_slice<S: AsRef<OsStr>>(cmd: &[S]) -> Self {
        let mut iter = cmd.iter();
        let program = iter
            .next()
            .map(|s| s.as_ref().to_owned())
            .unwrap_or_default();
        let args: Vec<_> = iter.map(|s| s.as_ref().to_owned()).collect();
        Self {
            program,
            args,
            ..Default::default()
        }
    }

    /// Set environment variables for the subprocess.
    pub fn envs<K, V, I>(mut self, vars: I) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in vars {
            self.envs.push((k.as_ref().to_owned(), v.as_ref().to_owned()));
        }
        self
    }

    /// Set stdin data to pipe to the process.
    pub fn stdin<D: AsRef<[u8]>>(mut self, data: D) -> Self {
        self.stdin_data = Some(data.as_ref().to_vec());
        self
    }

    /// Execute the command and return output.
    pub fn run(self) -> Result<Output> {
        let name = self.program_name();

        if self.stdin_data.is_none() {
            let output = self
                .command()
                .output()
                .with_context(|| format!("Failed to execute `{name}`"))?;
            return check_output(&name, output);
        }

        match self.run_until(|| false)? {
            Some(output) => Ok(output),
            None => anyhow::bail!("Command `{name}` was stopped"),
        }
    }

    /// Execute the command, killing it once `should_stop` returns true.
    ///
    /// Returns `Ok(None)` when the process was stopped before it exited.
    pub fn run_until(mut self, should_stop: impl Fn() -> bool) -> Result<Option<Output>> {
        let name = self.program_name();
        let stdin_data = self.stdin_data.take();

        let mut cmd = self.command();
        cmd.stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn `{name}`"))?;

        // Feed stdin from a thread so a chatty child cannot deadlock us
        let writer = stdin_data.zip(child.stdin.take()).map(|(data, mut stdin)| {
            std::thread::spawn(move || {
                let _ = stdin.write_all(&data);
            })
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("Failed to wait for `{name}`"))?
            {
                break status;
            }
            if should_stop() {
                stop(&mut child);
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if let Some(writer) = writer {
            let _ = writer.join();
        }
        let output = Output {
            status,
            stdout: collect(stdout),
            stderr: collect(stderr),
        };
        check_output(&name, output).map(Some)
    }

    /// Get the program name for error messages.
    fn program_name(&self) -> String {
        self.program.to_string_lossy().to_string()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).envs(self.envs.iter().cloned());
        cmd
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn stop(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

// ============================================================================
// Output Handling
// ============================================================================

/// Fail on a non-zero exit, otherwise log stderr and hand the output back.
fn check_output(name: &str, output: Output) -> Result<Output> {
    if !output.status.success() {
        anyhow::bail!(format_error(name, &output));
    }
    log_stderr(name, &String::from_utf8_lossy(&output.stderr));
    Ok(output)
}

/// Log the non-blank stderr lines of a successful run.
fn log_stderr(name: &str, stderr: &str) {
    let lines: Vec<_> = stderr
        .lines()
        .filter(|line| !strip_ansi(line).trim().is_empty())
        .collect();

    if !lines.is_empty() {
        log!(name; "{}", lines.join("\n"));
    }
}

/// Strip ANSI escape codes from string.
fn strip_ansi(s: &str) -> std::borrow::Cow<'_, str> {
    static RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").ok());
    match RE.as_ref() {
        Some(re) => re.replace_all(s, ""),
        None => std::borrow::Cow::Borrowed(s),
    }
}

/// Format error message for failed command.
fn format_error(name: &str, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);

    let mut msg = format!("Command `{name}` failed with {}\n", output.status);
    msg.push_str(&strip_ansi(stderr.trim()));

    let stdout_trimmed = stdout.trim();
    if !stdout_trimmed.is_empty() {
        msg.push_str("\nStdout:\n");
        msg.push_str(stdout_trimmed);
    }
    msg
}

// ============================================================================
// Tests
// ============================================================================
