//! Brackets a task with notification mails.
//!
//! A start mail is sent when the task begins, report mails while it adds rows,
//! and either a completion or an interruption mail when it ends.

use std::{
    any::Any,
    fmt::Display,
    panic::{self, AssertUnwindSafe},
    time::Instant,
};

use chrono::Local;
use log::{debug, error, info};
use serde::Serialize;

use crate::{
    config::Config,
    mailer::Mailer,
    message::{compose, Context, MailKind},
    report::Report,
    units::natural_delta,
};

/// Marks a task as stopped on purpose, no interruption mail is sent for it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "interrupted by the user")
    }
}

impl std::error::Error for Interrupted {}

pub fn is_interrupted(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Interrupted>())
}

pub struct Notifier<M> {
    config: Config,
    mailer: M,
    enabled: bool,
    started: Instant,
    last_report: Instant,
    report: Report,
    interruption: Option<String>,
}

impl<M: Mailer> Notifier<M> {
    pub fn new(config: Config, mailer: M) -> Self {
        let now = Instant::now();
        Self {
            config,
            mailer,
            enabled: true,
            started: now,
            last_report: now,
            report: Report::new(),
            interruption: None,
        }
    }

    /// A disabled notifier accepts every call but sends nothing
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.started = Instant::now();
        self.last_report = self.started;
        self.send(MailKind::Start)
    }

    /// Adds a row to the report, mailing it if the report interval has passed
    pub fn add_report<T: Serialize + ?Sized>(&mut self, row: &T) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.report.push(row)?;
        self.send_report_if_due()
    }

    /// Like [`Self::add_report`] for several rows at once
    pub fn add_report_rows(&mut self, rows: Report) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.report.extend(rows);
        self.send_report_if_due()
    }

    pub fn complete(&mut self) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.send(MailKind::Completed)
    }

    /// Sends the interruption mail, `description` may span several lines
    pub fn fail(&mut self, description: &str) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.interruption = Some(description.to_string());
        self.send(MailKind::Interruption)
    }

    /// Runs `task` between the start mail and the completion or interruption mail
    ///
    /// Errors carrying [`Interrupted`] end the task without a mail. Any other
    /// error or a panic is mailed before being passed on to the caller.
    pub fn run<T, F>(&mut self, task: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut Self) -> anyhow::Result<T>,
    {
        self.start()?;
        match panic::catch_unwind(AssertUnwindSafe(|| task(self))) {
            Ok(Ok(value)) => {
                self.complete()?;
                Ok(value)
            }
            Ok(Err(err)) => {
                if is_interrupted(&err) {
                    info!("Task interrupted, no notification sent");
                } else {
                    self.fail_quietly(&format!("{err:?}"));
                }
                Err(err)
            }
            Err(payload) => {
                self.fail_quietly(&format!("panicked: {}", panic_message(payload.as_ref())));
                panic::resume_unwind(payload)
            }
        }
    }

    /// Failure to send must not hide the task's own error
    fn fail_quietly(&mut self, description: &str) {
        if let Err(e) = self.fail(description) {
            error!("Failed to send interruption notification: {e:?}");
        }
    }

    fn send_report_if_due(&mut self) -> anyhow::Result<()> {
        let interval = self.config.report_interval();
        if self.last_report.elapsed() > interval.as_duration() {
            debug!("More than {interval} since last report, sending report");
            self.last_report = Instant::now();
            self.send(MailKind::Report)?;
        }
        Ok(())
    }

    fn send(&self, kind: MailKind) -> anyhow::Result<()> {
        debug!("Sending {kind} notification");
        let email = compose(kind, &self.context());
        self.mailer.send(&email)
    }

    fn context(&self) -> Context {
        let mut context = Context::new();
        context
            .with_config(&self.config)
            .set("hostname", hostname())
            .set("username", username())
            .set("pwd", working_dir())
            .set("elapsed", natural_delta(self.started.elapsed()))
            .set("now", Local::now().format("%F").to_string())
            .with_report(&self.report)
            .with_interruption(self.interruption.as_deref());
        context
    }
}

fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown host".to_string())
}

fn username() -> String {
    match std::env::var("USER").or_else(|_| std::env::var("USERNAME")) {
        Ok(name) => name,
        Err(e) => {
            debug!("Unable to get user name: {e}");
            "unknown user".to_string()
        }
    }
}

fn working_dir() -> String {
    match std::env::current_dir() {
        Ok(path) => path.display().to_string(),
        Err(e) => {
            debug!("Unable to get working directory: {e}");
            String::new()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}
