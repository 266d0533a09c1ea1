//! Flock: a swarm of simulated personalities talking on a shared feed.
//!
//! Each personality runs as its own agent: it reads every post, decides
//! whether the post touches its interests, drafts a reply in character,
//! runs the draft past a cringe filter, and posts it back to the feed.

mod activity;
mod agent;
mod bus;
mod cli;
mod config;
mod constants;
mod cringe;
mod openai;
mod orchestrator;
mod personality;
mod prompts;
#[cfg(test)]
mod testing;
mod util;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::bus::{LocalBus, MessageBus};
use crate::cli::{Cli, Commands, RunArgs};
use crate::config::Config;
use crate::constants::SIMULATOR_AUTHOR;
use crate::openai::{LanguageModel, OpenAiClient};
use crate::orchestrator::Orchestrator;
use crate::personality::ProfileSet;
use crate::util::env_first;

// ── Entry point ──────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = load_config(cli.data_dir.as_deref())?;
    match cli.command {
        Commands::Run(args) => run_simulation(args, config).await,
        Commands::Check { profile_set } => check_profile_set(&config, &profile_set),
    }
}

/// Logs go to stderr so stdout stays free for command output.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Environment config, with `--data-dir` standing in for `FLOCK_DATA_DIR`.
fn load_config(data_dir: Option<&Path>) -> Result<Config> {
    let config = match data_dir {
        None => Config::from_env(),
        Some(dir) => {
            let dir = dir.display().to_string();
            Config::resolve(|keys| match keys {
                ["FLOCK_DATA_DIR"] => Some(dir.clone()),
                _ => env_first(keys),
            })
        }
    };
    config.context("load configuration")
}

// ── Commands ─────────────────────────────────────────────────────────

async fn run_simulation(args: RunArgs, mut config: Config) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let seed = match &args.seed_file {
        Some(path) => read_seed_file(path)?,
        None => Vec::new(),
    };
    let model: Arc<dyn LanguageModel> = Arc::new(OpenAiClient::new(&config.openai)?);
    let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new(config.bus.capacity));
    info!(
        model = %config.openai.model,
        cringe_filter = config.cringe.enabled,
        logs = %config.session_log_dir().display(),
        "configuration loaded"
    );

    let mut orchestrator = Orchestrator::new(config, args.profile_set.clone(), model, bus);
    orchestrator.start().await?;
    if orchestrator.running() == 0 {
        orchestrator.stop().await;
        bail!("profile set {:?} has no usable personalities", args.profile_set);
    }
    info!(agents = ?orchestrator.agent_names(), "agents listening");
    orchestrator.watch_feed().await?;

    for line in &seed {
        orchestrator.inject(SIMULATOR_AUTHOR, line).await?;
    }
    info!("running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("wait for Ctrl-C")?;
    orchestrator.stop().await;
    Ok(())
}

fn check_profile_set(config: &Config, id: &str) -> Result<()> {
    let set = ProfileSet::open(&config.profiles_dir, id)?;
    println!(
        "{} ({} declared in metadata)",
        set.dir.display(),
        set.metadata.num_agents
    );

    let mut usable = 0;
    for (path, loaded) in set.load_all()? {
        match loaded {
            Ok(personality) => {
                usable += 1;
                println!("  ok     {}", personality.name);
            }
            Err(err) => println!("  error  {}: {err}", path.display()),
        }
    }
    if usable == 0 {
        bail!("profile set {id:?} has no usable personalities");
    }
    println!("{usable} usable personalities");
    Ok(())
}

/// Opening messages: one per line, blank lines skipped.
fn read_seed_file(path: &Path) -> Result<Vec<String>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read seed file {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
