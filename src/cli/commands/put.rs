//! `cryptovault put`: encrypt and store a secret.

use std::io::{self, IsTerminal, Read};

use zeroize::Zeroizing;

use crate::cli::output;
use crate::cli::{open_vault, Cli};
use crate::errors::{Result, VaultError};

/// Execute the `put` command.
pub fn execute(cli: &Cli, key: &str, value: Option<&str>) -> Result<()> {
    crate::vault::validate_key(key)?;

    // Determine the secret value from one of three sources.
    let secret_value = Zeroizing::new(if let Some(v) = value {
        // Source 1: Inline value on the command line.
        output::warning("Value provided on command line; it may appear in shell history.");
        v.to_string()
    } else if !io::stdin().is_terminal() {
        // Source 2: Piped input (stdin is not a terminal).
        let mut buf = Zeroizing::new(String::new());
        io::stdin().read_to_string(&mut buf)?;
        buf.trim_end_matches(['\n', '\r']).to_string()
    } else {
        // Source 3: Interactive secure prompt (default).
        dialoguer::Password::new()
            .with_prompt(format!("Enter value for {key}"))
            .allow_empty_password(true)
            .interact()
            .map_err(|e| VaultError::CommandFailed(format!("input prompt: {e}")))?
    });

    let vault = open_vault(cli)?;
    let existed = vault.contains_key(key);
    vault.put_string_blocking(key, &secret_value)?;

    if existed {
        output::success(&format!("Secret '{key}' updated"));
    } else {
        output::success(&format!("Secret '{key}' stored"));
        output::tip(&format!("Read it back: cryptovault get {key}"));
    }

    Ok(())
}
