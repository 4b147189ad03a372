//! `cryptovault list`: display stored secrets in a table.
//!
//! Only metadata is shown; nothing is decrypted.

use crate::cli::output;
use crate::cli::{open_vault, Cli};
use crate::errors::Result;

/// Execute the `list` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let vault = open_vault(cli)?;
    let entries = vault.entries()?;

    output::info(&format!(
        "{}: {} secret(s)",
        vault.path().display(),
        entries.len()
    ));

    output::print_entries_table(&entries);

    Ok(())
}
