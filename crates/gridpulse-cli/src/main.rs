//! CLI for gridpulse: pull device telemetry, aggregate it, serve the result.

mod commands;

use clap::{Parser, Subcommand};

use commands::ConfigArgs;

#[derive(Parser)]
#[command(name = "gridpulse")]
#[command(about = "gridpulse: daily device telemetry averages, always served consistent")]
#[command(version = gridpulse_core::VERSION)]
struct Cli {
    /// Log at debug level (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the refresh loop and the HTTP query endpoint until Ctrl+C
    Serve {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Run a single refresh cycle and print the snapshot as JSON
    Fetch {
        #[command(flatten)]
        config: ConfigArgs,

        /// Write the snapshot to this file instead of stdout
        #[arg(long)]
        output: Option<String>,
    },

    /// Print the effective configuration as JSON
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn main() {
    let cli = Cli::parse();
    commands::init_logging(cli.verbose);

    match cli.command {
        Commands::Serve { config } => commands::serve::run(commands::resolve_or_exit(&config)),
        Commands::Fetch { config, output } => {
            commands::fetch::run(&commands::resolve_or_exit(&config), output.as_deref())
        }
        Commands::Config { config } => commands::config::run(&commands::resolve_or_exit(&config)),
    }
}
