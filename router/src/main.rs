mod cli;

use crate::cli::logs::run_logs;
use clap::{Parser, Subcommand};
use router_core::logging::{default_log_mode, init_logging, LogMode};
use router_core::server;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "router", version, about = "Multi-tenant LLM request router")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the router's data-plane and admin listeners (default).
    Run {
        /// Path to the router's TOML config file.
        #[arg(long, default_value = "config/router.toml")]
        config: PathBuf,
    },

    /// Pretty-print structured JSON logs piped in on stdin.
    Logs {
        #[arg(long)]
        pretty: bool,

        #[arg(long)]
        raw: bool,
    },
}

fn run(config: PathBuf) {
    init_logging();

    let server = server::build_pingora_server(&config).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to start router");
        std::process::exit(1);
    });

    server.run_forever();
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Logs { pretty, raw }) => {
            let mode = if raw {
                LogMode::Raw
            } else if pretty {
                LogMode::Pretty
            } else {
                default_log_mode()
            };
            if let Err(err) = run_logs(mode) {
                eprintln!("logs error: {err}");
                std::process::exit(1);
            }
        }
        Some(Command::Run { config }) => run(config),
        None => run(PathBuf::from("config/router.toml")),
    }
}
