use std::process::ExitCode;

use clap::Parser;
use task_mailer::{init_logging, run, Cli};

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let _handle = init_logging(cli.log_level.into())?;
    let code = run(cli)?;
    Ok(ExitCode::from(code))
}
