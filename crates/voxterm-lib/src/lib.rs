//! voxterm-lib — Voice assistant runtime.
//!
//! Speech output, override store, lifecycle, built-in modules, the calling
//! harness and the HTTP API. Depends on voxterm-core for the dispatch engine.

pub mod assistant;
pub mod config;
pub mod daemon;
pub mod lifecycle;
pub mod modules;
pub mod scripted;
pub mod server;
pub mod speech;
pub mod store;

// Re-export voxterm-core for convenience
pub use voxterm_core;
