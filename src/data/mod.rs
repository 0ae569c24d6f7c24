//! Data layer module
//!
//! Handles persistence and caching for the federation core:
//! - SQLite followers store
//! - Remote actor document cache (volatile)

mod cache;
mod database;
mod models;

pub use cache::ActorCache;
pub use database::Database;
pub use models::*;
