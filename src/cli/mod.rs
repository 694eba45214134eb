pub mod process;
pub mod status;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use process::{agent_path, kill_running_agents, restart_agent};
use status::collect_status;
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::{args::ConfigOverrides, load_config, start_daemon},
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "Shiftwatch", version, long_about = None)]
#[command(about = "Agent recording application usage during work shifts", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(long, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts the agent in the background, replacing a running one")]
    Init {
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
    #[command(
        about = "Run the agent directly in current console. Used for debugging and for service managers"
    )]
    Serve {
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
    #[command(about = "Stop currently running agents.")]
    Stop {},
    #[command(about = "Show queued records and whether the endpoint is reachable")]
    Status {
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = args
        .dir
        .clone()
        .map_or_else(create_application_default_path, Ok)?;

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &app_dir, logging_level, args.log)?;

    match args.commands {
        Commands::Init { overrides } => {
            restart_agent(args.dir.as_deref(), &overrides)?;
            println!("Agent started");
            Ok(())
        }
        Commands::Stop {} => {
            let stopped = kill_running_agents(&agent_path()?)?;
            println!("Stopped {stopped} agents");
            Ok(())
        }
        Commands::Serve { overrides } => start_daemon(&app_dir, overrides).await,
        Commands::Status { overrides } => {
            let config = load_config(&app_dir, overrides)?;
            println!("{}", collect_status(&app_dir, &config).await?);
            Ok(())
        }
    }
}
