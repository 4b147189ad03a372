//! Project configuration (`.cryptovault.toml`).

pub mod settings;

pub use settings::{KeySourceKind, Settings};
