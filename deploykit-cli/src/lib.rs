//! Deploykit CLI library

pub mod commands;
pub mod exo;
pub mod prompt;

use clap::{Parser, Subcommand};
use deploykit::observability::LogFormat;

/// Deploykit - build, provision and deploy to managed Kubernetes
#[derive(Parser, Debug)]
#[command(name = "deploykit")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format (human or json)
    #[arg(long, global = true, default_value_t = LogFormat::Human, env = "DEPLOYKIT_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build, push, provision and deploy
    Deploy(commands::deploy::DeployArgs),
    /// Delete every resource recorded in a deployment report
    Teardown(commands::teardown::TeardownArgs),
}

impl Cli {
    /// Run the CLI command and return the process exit status
    pub async fn run(self) -> anyhow::Result<i32> {
        match self.command {
            Commands::Deploy(args) => commands::deploy::run(args).await,
            Commands::Teardown(args) => commands::teardown::run(args).await,
        }
    }
}
