mod agent;
mod classifier;
mod cli;
mod config;
mod cost;
mod dispatch;
mod error;
mod git;
mod hub;
mod orchestrator;
mod selector;
mod staleness;
mod state_machine;
mod ui;
mod verify;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;

use agent::HttpAgentRunner;
use cli::{Cli, Command};
use config::GreenloopConfig;
use git::GitManager;
use hub::HubClient;
use orchestrator::Orchestrator;
use selector::Backlog;
use verify::CommandChecksRunner;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GreenloopConfig::load_from(Path::new(path))?,
        None => GreenloopConfig::load()?,
    };
    let backlog = Backlog::load(Path::new(&config.backlog_path))?;

    let hub = HubClient::new(config.token.clone(), config.hub_base_url.clone());
    let agent = HttpAgentRunner::new(config.token.clone(), config.agent_base_url.clone());
    let checks = CommandChecksRunner::new(
        &config.quality_command,
        &config.functional_command,
        PathBuf::from(&config.workdir),
    );
    let git = match GitManager::open(Path::new(&config.workdir)) {
        Ok(git) => Some(git),
        Err(err) => {
            if cli.verbose {
                eprintln!("branch sync disabled: {err}");
            }
            None
        }
    };

    let orchestrator = Orchestrator::new(hub, agent, checks, git, backlog, config);

    match cli.command {
        Command::Run => orchestrator.run_loop().await?,
        Command::Step => {
            let outcome = orchestrator.run_cycle(Utc::now()).await?;
            println!("{outcome}");
        }
        Command::Status => {
            let report = orchestrator
                .status(Utc::now())
                .await
                .context("failed to assemble the status report")?;
            ui::print_status(&report);
        }
    }

    Ok(())
}
