//! Layered configuration for the board and habit services.
//!
//! Settings come from three layers, highest priority last:
//! 1. compiled defaults ([`Settings::default()`])
//! 2. `~/.devcollab/settings.json`, deep-merged over the defaults
//! 3. `DEVCOLLAB_*` environment variables

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{data_dir, deep_merge, load_settings, load_settings_from_path, resolve_path, settings_path};
pub use types::*;
