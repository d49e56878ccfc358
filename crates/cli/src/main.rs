//! Operator CLI for the Zenodo deposition engine.

mod commands;

use clap::Parser;
use commands::{AssumeYes, CliError, Command, Interactive, Prompt};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use zenodo_common::{config::AppConfig, Services};

#[derive(Parser)]
#[command(name = "zenodo")]
#[command(about = "Operator commands for the Zenodo deposition engine")]
#[command(version)]
struct Cli {
    /// Skip confirmation prompts
    #[arg(short, long, global = true, default_value_t = false)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let Cli { yes, command } = Cli::parse();

    match execute(yes, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e.downcast_ref::<CliError>().map(CliError::exit_code).unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn execute(yes: bool, command: Command) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let services = Services::from_config(config).await?;

    let mut prompt: Box<dyn Prompt> = if yes {
        Box::new(AssumeYes)
    } else {
        Box::new(Interactive::new(std::io::stdin().lock(), std::io::stdout()))
    };
    let mut stdout = std::io::stdout();
    commands::run(&services, command, prompt.as_mut(), &mut stdout).await?;
    Ok(())
}
