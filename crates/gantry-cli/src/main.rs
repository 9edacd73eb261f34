//! Gantry CLI entrypoint.

use clap::Parser;
use std::process::ExitCode;

mod commands;
mod config;
mod handlers;
mod logging;

use commands::{Commands, ConfigCommands};
use config::{CliConfig, LogFormat};

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about = "Vendor-neutral CI/CD orchestration", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, env = "GANTRY_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match CliConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("warning: ignoring config file: {:#}", e);
            CliConfig::default()
        }
    };
    logging::init(cli.log_format.unwrap_or(config.log_format));

    match dispatch(cli.command, &config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Returns `false` when the command completed but the run did not succeed.
async fn dispatch(command: Commands, config: &CliConfig) -> anyhow::Result<bool> {
    match command {
        Commands::Init { force } => handlers::init(force)?,
        Commands::Validate { path } => handlers::validate(&path)?,
        Commands::Plan { pipeline, trigger } => handlers::plan(&pipeline, &trigger, config)?,
        Commands::Run {
            pipeline,
            trigger,
            workspace,
            artifacts_dir,
            max_parallel,
            json,
        } => {
            let status = handlers::run(
                &pipeline,
                &trigger,
                workspace,
                artifacts_dir,
                max_parallel,
                json,
                config,
            )
            .await?;
            return Ok(status.is_success());
        }
        Commands::Deploy {
            image,
            pipeline,
            repo,
            push,
        } => handlers::deploy(&image, &pipeline, &repo, push).await?,
        Commands::Cleanup {
            pipeline,
            keep_last,
            exclude_run,
            dry_run,
        } => handlers::cleanup(&pipeline, keep_last, exclude_run, dry_run, config).await?,
        Commands::Schema => handlers::schema()?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }
    Ok(true)
}
