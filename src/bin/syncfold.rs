//! syncfold CLI binary

use anyhow::Context;
use clap::Parser;
use syncfold::cli::{Cli, CliContext};
use syncfold::logging::init_logging;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = CliContext::load_config(cli.config.as_ref()).context("loading configuration")?;
    let logging = cli.logging_config(&config.logging);
    init_logging(Some(&logging)).context("initialising logging")?;

    let context = CliContext::new(config).context("initialising syncfold")?;
    let output = context.execute(&cli.command)?;
    println!("{}", output);
    Ok(())
}
