use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Export Netatmo weather station measurements to CSV files.
#[derive(Debug, Parser)]
#[command(name = "netatmo", version, about)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file [default: ~/.netatmo.toml]
    #[arg(short, long, global = true, env = "NETATMO_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Set credentials and the default station, then show the configuration
    Config(ConfigArgs),
    /// Append new measurements of every module to the export directory
    Fetch(FetchArgs),
    /// List stations with their modules and metrics
    List,
    /// Check that the credentials give access to the API
    Test,
    /// Show station details, latest readings and the last half hour of data
    Dump(DumpArgs),
}

/// The four credential flags go together: any one of them requires the
/// others.
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Account e-mail address
    #[arg(short = 'u', long, requires = "password")]
    pub username: Option<String>,

    /// Account password
    #[arg(short = 'p', long, requires = "client_id")]
    pub password: Option<String>,

    /// Application client id
    #[arg(short = 'i', long, requires = "client_secret")]
    pub client_id: Option<String>,

    /// Application client secret
    #[arg(short = 's', long, requires = "username")]
    pub client_secret: Option<String>,

    /// Default station, as a MAC address or a station name ("" to clear)
    #[arg(short = 'd', long)]
    pub device: Option<String>,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Export directory [default: from the configuration, or "."]
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct DumpArgs {
    /// Station to show, as a MAC address or a station name
    #[arg(short = 'd', long)]
    pub device: Option<String>,
}
