pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use carbonex_agent::KnowledgeDomain;
use clap::{Parser, Subcommand};
use tracing::info_span;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "carbonex",
    about = "Carbonex operator CLI",
    long_about = "Inspect configuration, check readiness, apply migrations, index knowledge-base documents and run one-shot emission calculations.",
    after_help = "Examples:\n  carbonex doctor --json\n  carbonex ingest --collection education --dir data/education\n  carbonex calculate --sector cement --answer clinker_production=1000"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database connectivity and vector store reachability")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Chunk, embed and index a directory of markdown/text documents")]
    Ingest {
        #[arg(long, help = "Knowledge base to fill: education | formalities")]
        collection: KnowledgeDomain,
        #[arg(long, help = "Directory scanned recursively for .md and .txt files")]
        dir: PathBuf,
    },
    #[command(about = "Calculate emissions for a sector from questionnaire answers")]
    Calculate {
        #[arg(long, help = "Sector code: cement | iron_steel | textiles")]
        sector: String,
        #[arg(long = "answer", value_name = "ID=VALUE", help = "Questionnaire answer, repeatable")]
        answers: Vec<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let span = info_span!("cli", correlation_id = %Uuid::new_v4());
    let _entered = span.enter();

    let result = match cli.command {
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Migrate => commands::migrate::run(),
        Command::Ingest { collection, dir } => commands::ingest::run(collection, &dir),
        Command::Calculate { sector, answers } => commands::calculate::run(&sector, &answers),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
