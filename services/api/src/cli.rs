use crate::demo::{run_demo, run_roster_check, DemoArgs, RosterCheckArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use syllabus::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Syllabus",
    about = "Run and demonstrate the enrollment and completion engine from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Roster utilities for bulk enrollment
    Roster {
        #[command(subcommand)]
        command: RosterCommand,
    },
    /// Walk a learner through a sample plan and print every cascade step
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum RosterCommand {
    /// Validate a roster CSV and list the entries it would enroll
    Check(RosterCheckArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// JSON catalog (users, courses, plans, items, tests) to preload
    #[arg(long)]
    pub(crate) catalog: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Roster {
            command: RosterCommand::Check(args),
        } => run_roster_check(args),
        Command::Demo(args) => run_demo(args),
    }
}
