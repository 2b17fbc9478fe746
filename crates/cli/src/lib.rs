pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "skillbridge",
    about = "Skillbridge operator CLI",
    long_about = "Inspect configuration, check readiness, sync the skills catalog, and query the agent runtime from a terminal.",
    after_help = "Examples:\n  skillbridge doctor --json\n  skillbridge skills --dry-run\n  skillbridge ask --verbose \"What skills are available?\"\n  skillbridge chat"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Check config, gateway credentials, the agent CLI, and the skills source")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Sync skill bundles from the source directory into the runtime catalog")]
    Skills {
        #[arg(long, help = "Report what would be linked without touching the target")]
        dry_run: bool,
    },
    #[command(about = "Send one message to the agent runtime and print the reply")]
    Ask {
        message: String,
        #[arg(long, help = "Include every reasoning step in the output")]
        verbose: bool,
    },
    #[command(about = "Start an interactive chat session")]
    Chat,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Skills { dry_run } => commands::skills::run(dry_run),
        Command::Ask { message, verbose } => commands::ask::run(&message, verbose),
        Command::Chat => commands::chat::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Diagnostics go to stderr so stdout stays parseable. Quiet unless
/// `SKILLBRIDGE_CLI_LOG` asks for more.
fn init_logging() {
    let filter =
        EnvFilter::try_from_env("SKILLBRIDGE_CLI_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
