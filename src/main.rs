use anyhow::Result;
use clap::{Parser, Subcommand};
use reelgrab::cli;
use reelgrab::prescan::SortOrder;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "reelgrab",
    about = "Reelgrab — profile media harvester",
    version,
    after_help = "Run 'reelgrab <command> --help' for details on each command."
)]
struct Cli {
    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest a profile's posts into local folders
    Run {
        /// Account handle to harvest (e.g. "natgeo")
        target: String,
        /// Root output directory (media lands under <dir>/<handle>/)
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
        /// Pause for a manual login before harvesting
        #[arg(long)]
        login: bool,
        /// Harvest the tagged feed instead of the profile's own posts
        #[arg(long)]
        tagged: bool,
        /// Run the browser headless
        #[arg(long)]
        headless: bool,
        /// Mute browser audio (the harvester unmutes the player itself)
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        mute: bool,
        /// Processing order of the discovered posts
        #[arg(long, value_enum, default_value = "default")]
        sort: SortOrder,
        /// Skip posts whose ownership cannot be positively confirmed
        #[arg(long)]
        strict_owner: bool,
    },
    /// Check environment and diagnose issues
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "reelgrab=debug"
    } else {
        "reelgrab=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)),
        )
        .init();

    let result = match cli.command {
        Commands::Run {
            target,
            output_dir,
            login,
            tagged,
            headless,
            mute,
            sort,
            strict_owner,
        } => {
            cli::run_cmd::run(cli::run_cmd::RunOptions {
                target,
                output_dir,
                login,
                tagged,
                headless,
                mute,
                sort,
                strict_owner,
            })
            .await
        }
        Commands::Doctor => cli::doctor::run().await,
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }

    result
}
