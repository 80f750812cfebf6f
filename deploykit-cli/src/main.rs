//! Deploykit CLI
//!
//! Builds, provisions and deploys a service, or tears a deployment down.

use clap::Parser;
use deploykit::observability::init_tracing;
use deploykit_cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = init_tracing(cli.log_format, "info") {
        eprintln!("warning: {err}");
    }

    let code = match cli.run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}
