mod extract;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Micronix CLI.
///
/// Enumerates a remote Unix-like host over a shell session and emits PDDL
/// planning problems whose solutions are privilege-escalation chains.
#[derive(Debug, Parser)]
#[clap(author, version)]
struct MultitoolCli {
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// Enumerate a target host and generate planning problems.
    #[clap(visible_alias = "e")]
    Extract(extract::ExtractCommand),
}

#[tokio::main]
async fn main() {
    let default_level = "info";
    let _ = tracing_subscriber::fmt()
        // Fallback to the `default_level` log filter if the environment
        // variable is not set _or_ contains an invalid value
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = MultitoolCli::parse();

    let result = match cli.subcommand {
        Subcommand::Extract(cmd) => extract::run_extract(cmd).await,
    };

    if let Err(err) = result {
        error!("{err:#}");
        std::process::exit(-1);
    }
}
