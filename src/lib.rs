mod cli;
mod command;
pub mod config;
mod logging;
pub mod mailer;
pub mod message;
pub mod notifier;
pub mod report;
pub mod setup;
pub mod training;
pub mod units;
mod utils;

use std::io::IsTerminal;

use log::{debug, warn};

pub use cli::{Cli, LogLevel};
pub use command::{absorb_interrupts, TaskCommand, TaskFailed};
pub use config::{Config, ConfigCache};
pub use logging::init_logging;
pub use mailer::{Email, Mailer, SmtpMailer};
pub use notifier::{Interrupted, Notifier};
pub use report::Report;
pub use setup::Credentials;
pub use training::{Logs, NotifyCallback, TrainingCallback};

use crate::setup::{cached_credentials, configure, is_resolvable, TerminalPrompter};

/// Runs the command given on the command line, returning its exit code
pub fn run(cli: Cli) -> anyhow::Result<u8> {
    let task = TaskCommand::new(cli.command.clone())?;
    let config_path = cli.get_config_path();

    let credentials = if cli.no_prompt {
        Some(cached_credentials(&config_path)?)
    } else if std::io::stdin().is_terminal() {
        let cache = ConfigCache::load_from(&config_path)?;
        let credentials = configure(cache, &mut TerminalPrompter, &is_resolvable)?;
        ConfigCache::from(&credentials.config).store_to(&config_path)?;
        Some(credentials)
    } else {
        warn!("No terminal to ask for settings and --no-prompt not given, notifications disabled");
        None
    };

    absorb_interrupts()?;
    match credentials {
        Some(credentials) => {
            debug!("Notifying with {credentials:?}");
            let mailer = SmtpMailer::new(&credentials)?;
            let mut notifier = Notifier::new(credentials.config, mailer);
            task.run_notified(&mut notifier)
        }
        None => task.run_plain(),
    }
}
