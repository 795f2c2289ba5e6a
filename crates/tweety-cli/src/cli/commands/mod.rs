//! CLI command handlers.

pub mod chat;
pub mod clear;
pub mod config;
pub mod models;
