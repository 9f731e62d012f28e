use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rackflow::output::OutputMode;

mod cmd;

#[derive(Parser)]
#[command(name = "rackflow")]
#[command(
    version,
    about = "Out-of-band firmware update orchestrator for rack-scale platforms"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a declarative factory flow against the configured devices
    #[command(name = "factory_mode")]
    FactoryMode {
        /// Configuration YAML (variables, connections, settings)
        #[arg(short = 'c', long = "config")]
        config: PathBuf,

        /// Flow YAML (steps, optional flows)
        #[arg(short = 'f', long = "flow")]
        flow: PathBuf,

        /// Log directory, created if missing
        #[arg(short = 'l', long = "log-dir")]
        log_dir: PathBuf,

        /// Override configuration.variables.output_mode
        #[arg(long = "output-mode", value_enum)]
        output_mode: Option<OutputMode>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::FactoryMode {
            config,
            flow,
            log_dir,
            output_mode,
        } => match cmd::cmd_factory_mode(&config, &flow, &log_dir, output_mode).await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("Error: {e:#}");
                1
            }
        },
    };

    // Single machine-parsable line for scripting, in every mode.
    println!("Error Code: {code}");
    std::process::exit(code);
}
