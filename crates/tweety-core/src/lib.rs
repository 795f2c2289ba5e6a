//! Core tweety library (session controller, engine, store, config).

pub mod config;
pub mod core;
pub mod engine;
pub mod models;
pub mod store;
