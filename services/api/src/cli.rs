use crate::commands::{run_ingest, run_seed, run_validate, IngestArgs, ValidateArgs};
use crate::server;
use checkup_engine::error::AppError;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "Checkup Engine",
    about = "Validate, ingest, and score corporate health checkup uploads",
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
    /// Dry-run validation of a CSV upload without persisting anything
    Validate(ValidateArgs),
    /// Submit a CSV upload and optionally approve it in one step
    Ingest(IngestArgs),
    /// Write the standard reference catalog into the configured database
    Seed,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Validate(args) => run_validate(args),
        Command::Ingest(args) => run_ingest(args).await,
        Command::Seed => run_seed(),
    }
}
