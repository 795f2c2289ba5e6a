//! Clear command handler.

use anyhow::Result;
use tweety_core::config;
use tweety_core::store::{FileStore, MESSAGES_KEY, SESSION_ID_KEY, SessionStore};

pub fn run() -> Result<()> {
    let mut store = FileStore::new(config::paths::session_dir());
    store.remove(MESSAGES_KEY)?;
    store.remove(SESSION_ID_KEY)?;
    println!("Cleared saved chat.");
    Ok(())
}
