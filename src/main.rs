use clap::Parser;
use tracing_subscriber::EnvFilter;

use cryptovault::cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Put { ref key, ref value } => {
            cryptovault::cli::commands::put::execute(&cli, key, value.as_deref())
        }
        Commands::Get { ref key, mode } => cryptovault::cli::commands::get::execute(&cli, key, mode),
        Commands::Delete { ref key, force } => {
            cryptovault::cli::commands::delete::execute(&cli, key, force)
        }
        Commands::List => cryptovault::cli::commands::list::execute(&cli),
    };

    if let Err(e) = result {
        cryptovault::cli::output::error(&e.to_string());
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise `--verbose` turns on debug output for
/// the vault, and warnings are shown by default.
fn init_tracing(verbose: bool) {
    let default = if verbose { "cryptovault=debug" } else { "cryptovault=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
