pub mod check;
pub mod serve;
pub mod snapshot;

use anyhow::Result;
use std::path::Path;

use poolbroker::config::Config;

// Re-export command functions for convenience
pub use check::check_config;
pub use serve::serve;
pub use snapshot::snapshot;

/// Load configuration from a TOML file, or from the environment when no
/// file is given
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
}
