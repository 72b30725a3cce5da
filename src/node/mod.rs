//! Node module for collecting and normalizing proxy nodes
//!
//! This module provides functionality for:
//! - Fetching subscription bodies with retries and base64 unwrapping
//! - Detecting the source format and extracting nodes
//! - Parsing and synthesizing connection URIs per protocol
//! - Classifying nodes by protocol and removing duplicates
//! - Writing raw, per-protocol and combined output files

pub mod classify;
pub mod codec;
pub mod fetcher;
pub mod models;
pub mod output;
pub mod parser;

pub use classify::{classify, dedupe, dedupe_buckets, Buckets};
pub use codec::{parse_uri, synthesize_uri};
pub use fetcher::{FetchError, FetcherConfig, NodeFetcher};
pub use models::{Node, OpaqueNode, Scheme, StructuredNode, UNKNOWN_PROTOCOL};
pub use output::OutputWriter;
pub use parser::{NodeParser, ParserConfig};
