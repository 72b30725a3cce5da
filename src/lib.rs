//! Node Harvest - subscription node collector
//!
//! Fetches proxy node lists from remote subscriptions, normalizes the
//! different source formats, classifies nodes by protocol, removes
//! duplicates and writes one canonical URI per node.

pub mod config;
pub mod node;
pub mod pipeline;
pub mod progress;

pub use config::AppConfig;
pub use node::*;
pub use pipeline::{Pipeline, RunSummary, SourceResult};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
