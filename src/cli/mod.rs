//! CLI module: Clap argument parser, output helpers, and command implementations.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::config::{KeySourceKind, Settings};
use crate::errors::Result;
use crate::vault::Vault;

/// CryptoVault CLI: local encrypted key-value store for secrets.
#[derive(Parser)]
#[command(
    name = "cryptovault",
    about = "Local encrypted key-value store for secrets",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Vault directory (default: .cryptovault, or `vault_dir` from .cryptovault.toml)
    #[arg(long, global = true, env = "CRYPTOVAULT_DIR")]
    pub vault_dir: Option<String>,

    /// Where the master key comes from
    #[arg(long, value_enum, global = true)]
    pub key_source: Option<KeySourceKind>,

    /// Path to the key file (default: <vault_dir>/master.key)
    #[arg(long, global = true, env = "CRYPTOVAULT_KEYFILE")]
    pub keyfile: Option<String>,

    /// Log vault operations to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Store a secret (add or overwrite)
    Put {
        /// Secret name (e.g. api_token)
        key: String,
        /// Secret value (omit for piped stdin or interactive prompt)
        value: Option<String>,
    },

    /// Print a secret's value
    Get {
        /// Secret name
        key: String,
        /// How the value is read
        #[arg(short, long, value_enum, default_value_t = ReadMode::Blocking)]
        mode: ReadMode,
    },

    /// Delete a secret
    Delete {
        /// Secret name
        key: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// List stored secrets (names and timestamps only)
    List,
}

/// Read form used by `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReadMode {
    /// Read on the calling thread
    Blocking,
    /// Subscribe to a single-item stream
    Stream,
    /// Start a background read and wait on its handle
    Future,
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Load `.cryptovault.toml` from the current directory and apply the
/// command-line overrides on top.
pub fn load_settings(cli: &Cli) -> Result<(PathBuf, Settings)> {
    let cwd = std::env::current_dir()?;
    let mut settings = Settings::load(&cwd)?;

    if let Some(dir) = &cli.vault_dir {
        settings.vault_dir = dir.clone();
    }
    if let Some(source) = cli.key_source {
        settings.key_source = source;
    }
    if let Some(keyfile) = &cli.keyfile {
        settings.keyfile = Some(keyfile.clone());
    }

    Ok((cwd, settings))
}

/// Open the vault selected by the CLI arguments.
pub fn open_vault(cli: &Cli) -> Result<Vault> {
    let (project_dir, settings) = load_settings(cli)?;
    Vault::from_settings(&settings, &project_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_put_with_value() {
        let cli = Cli::try_parse_from(["cryptovault", "put", "token", "abc"]).unwrap();
        match cli.command {
            Commands::Put { key, value } => {
                assert_eq!(key, "token");
                assert_eq!(value.as_deref(), Some("abc"));
            }
            _ => panic!("expected put"),
        }
    }

    #[test]
    fn get_defaults_to_blocking_mode() {
        let cli = Cli::try_parse_from(["cryptovault", "get", "token"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Get {
                mode: ReadMode::Blocking,
                ..
            }
        ));
    }

    #[test]
    fn get_accepts_stream_and_future_modes() {
        for (flag, expected) in [("stream", ReadMode::Stream), ("future", ReadMode::Future)] {
            let cli = Cli::try_parse_from(["cryptovault", "get", "token", "--mode", flag]).unwrap();
            match cli.command {
                Commands::Get { mode, .. } => assert_eq!(mode, expected),
                _ => panic!("expected get"),
            }
        }
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cryptovault",
            "list",
            "--vault-dir",
            "/tmp/v",
            "--key-source",
            "keyfile",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.vault_dir.as_deref(), Some("/tmp/v"));
        assert_eq!(cli.key_source, Some(KeySourceKind::Keyfile));
        assert!(cli.verbose);
    }

    #[test]
    fn rejects_unknown_read_mode() {
        assert!(Cli::try_parse_from(["cryptovault", "get", "k", "--mode", "callback"]).is_err());
    }
}
