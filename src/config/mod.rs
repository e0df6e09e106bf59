mod loader;
mod schema;

pub use loader::{load_config, parse_config};
pub use schema::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        loader::load_config(path)
    }

    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".switchyard").join("config.yaml"))
    }

    /// Listen address, `host:port`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.gateway.host, self.gateway.port)
    }
}
