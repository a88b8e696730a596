//! courier CLI - drive and inspect the in-process message bus

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_core::Config;

mod commands;
mod logging;
mod messages;

use commands::{cmd_config_init, cmd_config_show, cmd_demo, cmd_run, cmd_stress};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "In-process message bus with per-context task schedulers")]
#[command(after_help = "\
QUICK START:
  courier demo                    # Scripted session with sample listeners
  courier stress --as-tasks       # Throughput through the schedulers
  courier config init             # Write ./courier.toml

CONFIG LOCATIONS:
  Local: ./courier.toml
  User:  ~/.config/courier/config.toml")]
struct Cli {
  /// Config file to use instead of the discovered one
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `courier config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show current effective configuration
  #[command(long_about = "Show the current effective configuration.\n\n\
    Displays which config file is being used and its contents as TOML.")]
  Show,

  /// Write a commented config template to ./courier.toml
  Init {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Run a scripted session: cursor moves, focus changes and status text
  Demo {
    /// Number of cursor-move bursts
    #[arg(long, default_value = "5")]
    bursts: u32,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Measure dispatch throughput
  #[command(after_help = "\
EXAMPLES:
  courier stress --messages 100000
  courier stress --messages 50000 --contexts 8 --as-tasks")]
  Stress {
    /// Messages to dispatch
    #[arg(short, long, default_value = "10000")]
    messages: u64,
    /// Routing contexts to spread them over
    #[arg(short, long, default_value = "4")]
    contexts: usize,
    /// Deliver through the per-context schedulers
    #[arg(long)]
    as_tasks: bool,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Start the bus and wait for Ctrl-C
  Run,
  /// Manage configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
  match explicit {
    Some(path) => Config::load(path).with_context(|| format!("Failed to load config {:?}", path)),
    None => {
      let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
      Ok(Config::discover(&cwd))
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let config = load_config(cli.config.as_deref())?;

  let _guard = init_logging(&config.logging);

  match cli.command {
    Commands::Demo { bursts, json } => cmd_demo(&config, bursts, json).await,
    Commands::Stress {
      messages,
      contexts,
      as_tasks,
      json,
    } => cmd_stress(&config, messages, contexts, as_tasks, json).await,
    Commands::Run => cmd_run(&config).await,

    // Config subcommands
    Commands::Config { command } => match command {
      ConfigCommand::Show => cmd_config_show(&config, cli.config.as_deref()).await,
      ConfigCommand::Init { force } => cmd_config_init(force).await,
    },
  }
}
