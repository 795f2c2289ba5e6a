//! Models command handler.

use anyhow::Result;
use tweety_core::config::Config;
use tweety_core::models::AVAILABLE_MODELS;

pub fn list(config: &Config) -> Result<()> {
    println!("Available models:");
    for model in AVAILABLE_MODELS {
        let marker = if model.id == config.model { "*" } else { " " };
        println!(
            "{marker} {:<18} {} ({})",
            model.id, model.name, model.parameters
        );
        println!("  {:<18} {}", "", model.description);
    }
    println!();
    println!("* configured default");
    Ok(())
}
