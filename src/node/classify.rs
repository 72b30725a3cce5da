//! Protocol classification and per-bucket deduplication

use crate::node::models::Node;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Nodes grouped by protocol identifier, buckets in first-seen order
pub type Buckets = IndexMap<String, Vec<Node>>;

/// Group nodes by protocol, keeping insertion order within each bucket
pub fn classify(nodes: impl IntoIterator<Item = Node>) -> Buckets {
    let mut buckets = Buckets::new();
    for node in nodes {
        buckets.entry(node.protocol()).or_default().push(node);
    }
    buckets
}

/// Drop every node whose identity key was already seen, keeping the first
pub fn dedupe(mut nodes: Vec<Node>) -> Vec<Node> {
    let mut seen = HashSet::with_capacity(nodes.len());
    nodes.retain(|node| seen.insert(node.identity_key()));
    nodes
}

/// Deduplicate each bucket independently; keys never collide across buckets
pub fn dedupe_buckets(buckets: Buckets) -> Buckets {
    buckets
        .into_iter()
        .map(|(protocol, nodes)| (protocol, dedupe(nodes)))
        .collect()
}
