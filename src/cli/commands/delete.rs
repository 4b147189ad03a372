//! `cryptovault delete`: remove a secret from the vault.

use dialoguer::Confirm;

use crate::cli::output;
use crate::cli::{open_vault, Cli};
use crate::errors::{Result, VaultError};

/// Execute the `delete` command.
pub fn execute(cli: &Cli, key: &str, force: bool) -> Result<()> {
    let vault = open_vault(cli)?;

    if !vault.contains_key(key) {
        return Err(VaultError::NotFound(key.to_string()));
    }

    // Unless --force is set, ask for confirmation before deleting.
    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete secret '{key}'?"))
            .default(false)
            .interact()
            .map_err(|e| VaultError::CommandFailed(format!("confirm prompt: {e}")))?;

        if !confirmed {
            return Err(VaultError::UserCancelled);
        }
    }

    vault.delete_blocking(key)?;
    output::success(&format!("Deleted secret '{key}'"));

    Ok(())
}
