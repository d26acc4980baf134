//! Keytree Server
//!
//! The server assembly: configuration, the single-writer update pipeline,
//! the distribution caches, the per-peer trackers, and the HTTP surface.
//! `main.rs` wires these together into the `keytree-server` binary.

pub mod config;
pub mod dkim;
pub mod distribution;
pub mod http;
pub mod server;
pub mod tracker;
pub mod util;

pub use config::{load_config, parse_duration, Args, Config, ServerInfo};
pub use server::{run_update_pipeline, LookupTrie, Server, UpdateError};
pub use tracker::{run_cleaner, spawn_trackers, Tracker};
