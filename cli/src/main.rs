mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "embertrack",
    version,
    about = "Passive loot tracker: tails the game log, segments runs, values drops"
)]
struct Cli {
    /// Override the store database path.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Override the game log file path.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and optionally seed the item table.
    Init {
        /// JSON file of item metadata to seed.
        #[arg(long)]
        seed: Option<PathBuf>,
    },
    /// Run the collector and serve the local HTTP API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        /// Keep all data beside the executable.
        #[arg(long)]
        portable: bool,
        /// Accepted for launcher compatibility; no window is hosted here.
        #[arg(long)]
        no_window: bool,
        /// Accepted for launcher compatibility; overlays are hosted by the
        /// desktop shell build.
        #[arg(long)]
        overlay: bool,
        #[arg(long)]
        overlay_only: bool,
    },
    /// Tail the log headlessly, printing deltas and run boundaries.
    Tail,
    /// Print recent runs.
    ShowRuns {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the current slot state and inventory totals.
    ShowState,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { seed } => commands::init(cli.db, seed).await,
        Commands::Serve {
            port,
            portable,
            no_window,
            overlay,
            overlay_only,
        } => {
            if no_window || overlay || overlay_only {
                eprintln!("note: window/overlay hosting is handled by the desktop shell");
            }
            commands::serve(cli.db, cli.log_file, port, portable).await
        }
        Commands::Tail => commands::tail(cli.db, cli.log_file).await,
        Commands::ShowRuns { limit } => commands::show_runs(cli.db, limit).await,
        Commands::ShowState => commands::show_state(cli.db).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}
