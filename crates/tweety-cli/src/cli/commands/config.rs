//! Config command handlers.

use anyhow::Result;
use tweety_core::config;

pub fn path() -> Result<()> {
    println!("{}", config::paths::config_path().display());
    Ok(())
}

pub fn init() -> Result<()> {
    let path = config::paths::config_path();
    if path.exists() {
        anyhow::bail!("Config already exists at {}", path.display());
    }
    config::Config::default().save_to(&path)?;
    println!("Created config at {}", path.display());
    Ok(())
}
