//! Runs an external command as the notified task.
//!
//! The command's stdout is echoed and every line holding a JSON object is added
//! to the report. Its stderr is echoed and the last lines are kept for the
//! interruption mail.

use std::{
    collections::VecDeque,
    fmt::Display,
    io::{BufRead, BufReader, Read},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
};

use anyhow::{anyhow, bail, Context};
use log::{debug, error, info};
use serde_json::{Map, Value};

use crate::{
    mailer::Mailer,
    notifier::{is_interrupted, Interrupted, Notifier},
};

/// Number of stderr lines kept for the interruption mail
pub const STDERR_TAIL_LINES: usize = 20;

const SIGINT: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCommand {
    program: String,
    args: Vec<String>,
}

/// The command ran but did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailed {
    pub command: String,
    pub reason: String,
    pub exit_code: u8,
    pub stderr_tail: Vec<String>,
}

impl Display for TaskFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}` {}", self.command, self.reason)?;
        if !self.stderr_tail.is_empty() {
            write!(f, "\n\nLast lines written to stderr:")?;
            for line in &self.stderr_tail {
                write!(f, "\n{line}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for TaskFailed {}

impl TaskCommand {
    pub fn new(mut parts: Vec<String>) -> anyhow::Result<Self> {
        if parts.is_empty() {
            bail!("No command given to run");
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
        })
    }

    /// Runs without any notification, returning the command's exit code
    pub fn run_plain(&self) -> anyhow::Result<u8> {
        info!("Running {self} without notifications");
        let status = self
            .command()
            .status()
            .with_context(|| format!("Failed to run {self}"))?;
        Ok(exit_code(&status))
    }

    /// Runs wrapped in the notifier's start and completion or interruption mails
    ///
    /// Failure of the command itself is reported through its exit code, errors
    /// are only returned when the command could not be run or supervised.
    pub fn run_notified<M: Mailer>(&self, notifier: &mut Notifier<M>) -> anyhow::Result<u8> {
        match notifier.run(|n| self.supervise(n)) {
            Ok(code) => Ok(code),
            Err(err) => {
                if let Some(failed) = err.downcast_ref::<TaskFailed>() {
                    error!("{failed}");
                    Ok(failed.exit_code)
                } else if is_interrupted(&err) {
                    info!("{err}");
                    Ok(128 + SIGINT as u8)
                } else {
                    Err(err)
                }
            }
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    fn supervise<M: Mailer>(&self, notifier: &mut Notifier<M>) -> anyhow::Result<u8> {
        debug!("Spawning {self}");
        let mut child = self
            .command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {self}"))?;

        let stderr = child.stderr.take().context("Stderr of task not captured")?;
        let stderr_reader = thread::Builder::new()
            .name("StderrTail".to_string())
            .spawn(move || tail_lines(stderr, STDERR_TAIL_LINES))
            .context("Failed to start stderr reader thread")?;

        if let Err(e) = forward_stdout(&mut child, notifier) {
            error!("Stopping {self} after failing to handle its output");
            if let Err(kill_err) = child.kill() {
                error!("Failed to stop {self}: {kill_err}");
            }
            let _ = child.wait();
            return Err(e);
        }

        let status = child
            .wait()
            .with_context(|| format!("Failed to wait for {self}"))?;
        let stderr_tail = stderr_reader
            .join()
            .map_err(|_| anyhow!("Stderr reader thread panicked"))?;
        self.check_status(status, stderr_tail)
    }

    fn check_status(&self, status: ExitStatus, stderr_tail: Vec<String>) -> anyhow::Result<u8> {
        if status.success() {
            debug!("{self} completed");
            return Ok(0);
        }
        let reason = match (status.code(), signal(&status)) {
            (_, Some(SIGINT)) => {
                return Err(anyhow::Error::new(Interrupted))
                    .with_context(|| format!("{self} was interrupted"));
            }
            (Some(code), _) => format!("exited with code {code}"),
            (None, Some(sig)) => format!("was killed by signal {sig}"),
            (None, None) => "ended without an exit code".to_string(),
        };
        Err(TaskFailed {
            command: self.to_string(),
            reason,
            exit_code: exit_code(&status),
            stderr_tail,
        }
        .into())
    }
}

impl Display for TaskCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Echoes the child's stdout, feeding report rows to the notifier
fn forward_stdout<M: Mailer>(child: &mut Child, notifier: &mut Notifier<M>) -> anyhow::Result<()> {
    let stdout = child.stdout.take().context("Stdout of task not captured")?;
    for line in BufReader::new(stdout).split(b'\n') {
        let line = line.context("Failed to read output of task")?;
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches('\r');
        println!("{line}");
        if let Some(row) = parse_report_row(line) {
            notifier.add_report(&row)?;
        }
    }
    Ok(())
}

/// A line of output is a report row if it holds a single JSON object
pub fn parse_report_row(line: &str) -> Option<Map<String, Value>> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Echoes `reader` to stderr, returning its last `keep` lines
fn tail_lines<R: Read>(reader: R, keep: usize) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(keep);
    for line in BufReader::new(reader).split(b'\n') {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read stderr of task: {e}");
                break;
            }
        };
        let line = String::from_utf8_lossy(&line).trim_end_matches('\r').to_string();
        eprintln!("{line}");
        if tail.len() == keep {
            tail.pop_front();
        }
        if keep > 0 {
            tail.push_back(line);
        }
    }
    tail.into()
}

/// Keeps this process alive on Ctrl-C so the task's own exit decides the outcome
///
/// The terminal delivers the interrupt to the task as well. Installing twice is fine.
pub fn absorb_interrupts() -> anyhow::Result<()> {
    match ctrlc::set_handler(|| info!("Interrupt received, waiting for the task to exit")) {
        Ok(()) | Err(ctrlc::Error::MultipleHandlers) => Ok(()),
        Err(e) => Err(e).context("Failed to install interrupt handler"),
    }
}

/// Exit code to pass on, signals map to 128 + signal number
fn exit_code(status: &ExitStatus) -> u8 {
    match (status.code(), signal(status)) {
        (Some(code), _) => code_to_u8(code),
        (None, Some(sig)) => 128u8.wrapping_add(sig as u8),
        (None, None) => 1,
    }
}

/// Codes outside 0..=255 are only possible on Windows and count as failure
fn code_to_u8(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

#[cfg(unix)]
fn signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal(_status: &ExitStatus) -> Option<i32> {
    None
}
