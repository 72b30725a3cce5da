//! Rendering and writing of per-protocol and combined node files

use crate::node::classify::Buckets;
use crate::node::codec::synthesize_uri;
use crate::node::models::{Node, StructuredNode};
use crate::Result;
use anyhow::Context;
use log::{debug, error, info};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default directory for deduplicated output
pub const DEFAULT_OUTPUT_DIR: &str = "out";

/// Default directory for pre-dedup snapshots
pub const DEFAULT_RAW_DIR: &str = "raw";

/// Name of the file holding every deduplicated node
pub const COMBINED_FILE: &str = "all.txt";

#[derive(Serialize)]
struct RawDocument<'a> {
    proxies: Vec<&'a StructuredNode>,
}

/// Render a bucket for the raw snapshot
///
/// Opaque nodes come first as one URI per line; structured nodes follow as a
/// single `proxies:` document.
pub fn render_raw(nodes: &[Node]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut structured = Vec::new();

    for node in nodes {
        match node {
            Node::Opaque(opaque) => lines.push(opaque.url.clone()),
            Node::Structured(record) => structured.push(record),
        }
    }

    if !structured.is_empty() {
        match serde_yaml::to_string(&RawDocument {
            proxies: structured,
        }) {
            Ok(dump) => lines.push(dump.trim_end().to_string()),
            Err(e) => error!("Failed to serialize structured nodes: {}", e),
        }
    }

    lines.join("\n")
}

/// Canonical output line for a node
///
/// Opaque nodes render as their trimmed URI. Structured nodes fall back to a
/// YAML dump of the record when no URI can be synthesized.
pub fn render_line(node: &Node) -> Option<String> {
    let record = match node {
        Node::Opaque(opaque) => return Some(opaque.url.clone()),
        Node::Structured(record) => record,
    };

    if let Some(uri) = synthesize_uri(node) {
        return Some(uri);
    }

    match serde_yaml::to_string(record) {
        Ok(dump) => Some(dump.trim().to_string()),
        Err(e) => {
            debug!("Failed to dump structured node: {}", e);
            None
        }
    }
}

/// Render the final lines of a bucket, dropping blank ones
pub fn render_final(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter_map(render_line)
        .filter(|line| !line.trim().is_empty())
        .collect()
}

/// Final lines of every bucket, protocol then insertion order
pub fn render_combined(buckets: &Buckets) -> Vec<String> {
    buckets
        .values()
        .flat_map(|nodes| render_final(nodes))
        .collect()
}

/// File name stem for a protocol identifier taken from untrusted input
pub fn file_stem(protocol: &str) -> String {
    protocol
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Writes node buckets to disk
#[derive(Debug, Clone)]
pub struct OutputWriter {
    output_dir: PathBuf,
    raw_dir: PathBuf,
    save_raw: bool,
}

impl OutputWriter {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(output_dir: P, raw_dir: Q) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            raw_dir: raw_dir.as_ref().to_path_buf(),
            save_raw: true,
        }
    }

    pub fn with_save_raw(mut self, save_raw: bool) -> Self {
        self.save_raw = save_raw;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    pub fn saves_raw(&self) -> bool {
        self.save_raw
    }

    /// Create the output directories; failure here aborts the run
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("cannot create output directory {}", self.output_dir.display())
        })?;
        if self.save_raw {
            fs::create_dir_all(&self.raw_dir).with_context(|| {
                format!("cannot create raw directory {}", self.raw_dir.display())
            })?;
        }
        Ok(())
    }

    /// Write `<protocol>_raw.txt` per bucket
    pub fn write_raw(&self, buckets: &Buckets) -> Vec<PathBuf> {
        if !self.save_raw {
            return Vec::new();
        }

        let mut written = Vec::new();
        for (protocol, nodes) in buckets {
            let path = self.raw_dir.join(format!("{}_raw.txt", file_stem(protocol)));
            if write_file(&path, &render_raw(nodes)) {
                info!(
                    "Saved {} raw {} nodes to {}",
                    nodes.len(),
                    protocol,
                    path.display()
                );
                written.push(path);
            }
        }
        written
    }

    /// Write `<protocol>.txt` per bucket
    pub fn write_final(&self, buckets: &Buckets) -> Vec<PathBuf> {
        let mut written = Vec::new();
        for (protocol, nodes) in buckets {
            let path = self.output_dir.join(format!("{}.txt", file_stem(protocol)));
            if write_file(&path, &render_final(nodes).join("\n")) {
                info!(
                    "Saved {} deduplicated {} nodes to {}",
                    nodes.len(),
                    protocol,
                    path.display()
                );
                written.push(path);
            }
        }
        written
    }

    /// Write every final line to the combined file; skipped when there are none
    pub fn write_combined(&self, buckets: &Buckets) -> Option<PathBuf> {
        let lines = render_combined(buckets);
        if lines.is_empty() {
            return None;
        }

        let path = self.output_dir.join(COMBINED_FILE);
        if write_file(&path, &lines.join("\n")) {
            info!("Saved {} nodes to {}", lines.len(), path.display());
            Some(path)
        } else {
            None
        }
    }
}

impl Default for OutputWriter {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR, DEFAULT_RAW_DIR)
    }
}

fn write_file(path: &Path, content: &str) -> bool {
    match fs::write(path, content) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to write {}: {}", path.display(), e);
            false
        }
    }
}
