pub(crate) mod analysis;
mod cli;
mod config;
mod error;
pub(crate) mod join;
mod logging;
pub(crate) mod model;
pub(crate) mod pipeline;
pub(crate) mod report;
pub(crate) mod sources;

pub(crate) use error::{AppError, AppResult};

use std::process::exit;

use clap::{ColorChoice, Parser};
use tracing::error;

use crate::cli::{Cli, GetVerbosity};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let ansi = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::IsTerminal::is_terminal(&std::io::stderr()),
    };
    logging::setup_logger(cli.cmd.get_verbosity().tracing_level_filter(), ansi);

    if let Err(e) = cli.cmd.run().await {
        error!("{e}");
        exit(1);
    }
}
