use std::process::ExitCode;

use tracing::Level;

fn main() -> ExitCode {
    // Command output owns stdout; diagnostics go to stderr.
    let level = std::env::var("CARBONEX_LOG_LEVEL")
        .ok()
        .and_then(|value| value.parse::<Level>().ok())
        .unwrap_or(Level::WARN);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_max_level(level)
        .compact()
        .init();

    carbonex_cli::run()
}
