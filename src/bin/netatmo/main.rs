mod cli;
mod commands;

use crate::cli::{Cli, Command};
use crate::commands::Workspace;
use anyhow::Context;
use clap::Parser;
use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logger(cli.verbose) {
        eprintln!("{e:#}");
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logger(verbosity: u8) -> anyhow::Result<()> {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = ConfigBuilder::new();
    builder.set_time_format_rfc3339();
    // falls back to UTC when the local offset can't be determined
    let config = match builder.set_time_offset_to_local() {
        Ok(builder) | Err(builder) => builder.build(),
    };

    TermLogger::init(
        level,
        config,
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let workspace = Workspace::open(cli.config)?;
    match cli.command {
        Command::Config(args) => commands::config(workspace, args),
        Command::Fetch(args) => commands::fetch(workspace, args),
        Command::List => commands::list(workspace),
        Command::Test => commands::test(workspace),
        Command::Dump(args) => commands::dump(workspace, args),
    }
}
