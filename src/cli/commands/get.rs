//! `cryptovault get`: decrypt and print a single secret's value.

use futures::StreamExt;
use zeroize::Zeroizing;

use crate::cli::{open_vault, Cli, ReadMode};
use crate::errors::{Result, VaultError};

/// Execute the `get` command.
pub fn execute(cli: &Cli, key: &str, mode: ReadMode) -> Result<()> {
    let vault = open_vault(cli)?;

    let value = Zeroizing::new(match mode {
        ReadMode::Blocking => vault.get_string_blocking(key)?,
        ReadMode::Stream => {
            let mut stream = vault.get_string_stream(key);
            futures::executor::block_on(stream.next())
                .unwrap_or_else(|| Err(VaultError::NotFound(key.to_string())))?
        }
        ReadMode::Future => vault.get_string_future(key).wait()?,
    });

    // Decrypted value goes to stdout, nothing else does.
    println!("{}", value.as_str());

    Ok(())
}
