use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "flock")]
#[command(about = "Simulated personalities arguing on a shared feed")]
#[command(version)]
pub struct Cli {
    /// Root folder for profile sets and agent logs
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start one agent per personality and run until Ctrl-C
    Run(RunArgs),

    /// Validate a profile set and list its personalities
    Check {
        /// Profile set id (a directory under the profiles folder)
        #[arg(long)]
        profile_set: String,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Profile set id (a directory under the profiles folder)
    #[arg(long)]
    pub profile_set: String,

    /// File of opening messages, one per line, posted once agents are up
    #[arg(long)]
    pub seed_file: Option<PathBuf>,

    /// Groups this run's session logs (default: timestamp)
    #[arg(long)]
    pub simulation_id: Option<String>,

    /// Post the first draft without scoring it
    #[arg(long)]
    pub no_cringe_filter: bool,

    /// Drafts scoring above this are re-drafted
    #[arg(long)]
    pub cringe_threshold: Option<f64>,

    /// Drafting attempts per message while the filter is on
    #[arg(long)]
    pub max_attempts: Option<usize>,

    /// Model calls in flight across all agents
    #[arg(long)]
    pub max_concurrent_calls: Option<usize>,
}

impl RunArgs {
    /// Layer the flags over the environment-derived config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(id) = &self.simulation_id {
            config.simulation_id = id.clone();
        }
        if self.no_cringe_filter {
            config.cringe.enabled = false;
        }
        if let Some(threshold) = self.cringe_threshold {
            config.cringe.threshold = threshold;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.cringe.max_attempts = max_attempts;
        }
        if let Some(limit) = self.max_concurrent_calls {
            config.max_concurrent_calls = limit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_override_the_environment() {
        let cli = Cli::try_parse_from([
            "flock",
            "run",
            "--profile-set",
            "set-1",
            "--no-cringe-filter",
            "--max-attempts",
            "4",
            "--simulation-id",
            "demo",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let mut config = Config::resolve(|_| None).unwrap();
        assert!(config.cringe.enabled);
        args.apply(&mut config);
        assert!(!config.cringe.enabled);
        assert_eq!(config.cringe.max_attempts, 4);
        assert_eq!(config.simulation_id, "demo");
        assert_eq!(args.profile_set, "set-1");
    }

    #[test]
    fn profile_set_is_required() {
        assert!(Cli::try_parse_from(["flock", "run"]).is_err());
        assert!(Cli::try_parse_from(["flock", "check", "--profile-set", "x"]).is_ok());
    }
}
