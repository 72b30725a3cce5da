//! Fetch, parse, classify, deduplicate and write nodes from every source

use crate::config::{AppConfig, DEFAULT_CONCURRENCY};
use crate::node::classify::{classify, dedupe, Buckets};
use crate::node::fetcher::NodeFetcher;
use crate::node::models::Node;
use crate::node::output::OutputWriter;
use crate::node::parser::NodeParser;
use crate::progress::ProgressBar;
use crate::Result;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::path::PathBuf;

/// Result of fetching and parsing a single source
#[derive(Debug, Clone)]
pub struct SourceResult {
    /// The source address
    pub source: String,
    /// Nodes parsed from the source
    pub nodes: Vec<Node>,
    /// Error message if the fetch failed
    pub error: Option<String>,
}

impl SourceResult {
    pub fn success(source: String, nodes: Vec<Node>) -> Self {
        Self {
            source,
            nodes,
            error: None,
        }
    }

    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            nodes: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Node counts for one protocol bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BucketStats {
    pub original: usize,
    pub deduplicated: usize,
}

impl BucketStats {
    pub fn removed(&self) -> usize {
        self.original - self.deduplicated
    }
}

/// Outcome of a pipeline run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub sources: usize,
    pub failed_sources: usize,
    pub buckets: IndexMap<String, BucketStats>,
    pub raw_files: Vec<PathBuf>,
    pub final_files: Vec<PathBuf>,
    pub combined_file: Option<PathBuf>,
}

impl RunSummary {
    pub fn total_original(&self) -> usize {
        self.buckets.values().map(|s| s.original).sum()
    }

    pub fn total_deduplicated(&self) -> usize {
        self.buckets.values().map(|s| s.deduplicated).sum()
    }

    pub fn total_removed(&self) -> usize {
        self.total_original() - self.total_deduplicated()
    }
}

/// Runs the whole ingestion pipeline over a list of sources
pub struct Pipeline {
    fetcher: NodeFetcher,
    parser: NodeParser,
    writer: OutputWriter,
    concurrency: usize,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(fetcher: NodeFetcher, parser: NodeParser, writer: OutputWriter) -> Self {
        Self {
            fetcher,
            parser,
            writer,
            concurrency: DEFAULT_CONCURRENCY,
            show_progress: false,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let fetcher = NodeFetcher::with_config(config.fetcher_config())?;
        let parser = NodeParser::with_config(config.parser_config());
        Ok(Self::new(fetcher, parser, config.output_writer())
            .with_concurrency(config.network.concurrency)
            .with_progress(config.logging.show_progress))
    }

    /// Number of sources fetched at once; 1 fetches strictly one after another
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Fetch and parse every source
    ///
    /// Up to `concurrency` sources are in flight at once, but results come back
    /// in source order so the merged node list matches a sequential run.
    pub async fn collect(&self, sources: &[String]) -> Vec<SourceResult> {
        debug!(
            "Fetching {} sources, {} at a time, up to {} attempts each",
            sources.len(),
            self.concurrency,
            self.fetcher.config().max_attempts
        );
        let mut progress = ProgressBar::new(sources.len(), self.show_progress);
        progress.update(0, "");

        stream::iter(sources)
            .map(|source| self.collect_source(source))
            .buffered(self.concurrency)
            .inspect(|result| progress.inc(&result.source))
            .collect()
            .await
    }

    async fn collect_source(&self, source: &str) -> SourceResult {
        match self.fetcher.fetch(source).await {
            Ok(body) => {
                let nodes = self.parser.parse(&body);
                info!("Got {} nodes from {}", nodes.len(), source);
                SourceResult::success(source.to_string(), nodes)
            }
            Err(e) => {
                warn!("Skipping {}: {}", source, e);
                SourceResult::failure(source.to_string(), e.to_string())
            }
        }
    }

    /// Run the full pipeline
    ///
    /// Only infrastructure failures (output directories) are returned as errors;
    /// failed sources just contribute no nodes.
    pub async fn run(&self, sources: &[String]) -> Result<RunSummary> {
        if sources.is_empty() {
            warn!("No source addresses configured");
            return Ok(RunSummary::default());
        }

        let results = self.collect(sources).await;
        let failed_sources = results.iter().filter(|r| !r.is_success()).count();
        let nodes: Vec<Node> = results.into_iter().flat_map(|r| r.nodes).collect();
        info!(
            "Collected {} nodes from {} sources ({} failed)",
            nodes.len(),
            sources.len(),
            failed_sources
        );

        let mut summary = if nodes.is_empty() {
            warn!("No nodes collected");
            RunSummary::default()
        } else {
            let writer = self.writer.clone();
            tokio::task::spawn_blocking(move || process_nodes(&writer, nodes)).await??
        };
        summary.sources = sources.len();
        summary.failed_sources = failed_sources;
        Ok(summary)
    }

    /// Classify, snapshot, deduplicate and write an already collected node list
    pub fn process(&self, nodes: Vec<Node>) -> Result<RunSummary> {
        process_nodes(&self.writer, nodes)
    }
}

/// Blocking half of a run: every file write happens here
fn process_nodes(writer: &OutputWriter, nodes: Vec<Node>) -> Result<RunSummary> {
    let buckets = classify(nodes);
    info!("Nodes by protocol:");
    for (protocol, bucket) in &buckets {
        info!("  {}: {} nodes", protocol, bucket.len());
    }

    writer.prepare()?;
    info!("Writing output to {}", writer.output_dir().display());
    if writer.saves_raw() {
        info!("Writing raw snapshots to {}", writer.raw_dir().display());
    }

    let mut summary = RunSummary {
        raw_files: writer.write_raw(&buckets),
        ..RunSummary::default()
    };

    let mut deduplicated = Buckets::new();
    for (protocol, bucket) in buckets {
        let original = bucket.len();
        let kept = dedupe(bucket);
        let stats = BucketStats {
            original,
            deduplicated: kept.len(),
        };
        if stats.removed() > 0 {
            info!(
                "  {}: {} -> {} (removed {})",
                protocol,
                stats.original,
                stats.deduplicated,
                stats.removed()
            );
        } else {
            info!("  {}: {} nodes (no duplicates)", protocol, stats.original);
        }
        summary.buckets.insert(protocol.clone(), stats);
        deduplicated.insert(protocol, kept);
    }
    info!(
        "Deduplicated {} nodes -> {} (removed {})",
        summary.total_original(),
        summary.total_deduplicated(),
        summary.total_removed()
    );

    summary.final_files = writer.write_final(&deduplicated);
    summary.combined_file = writer.write_combined(&deduplicated);
    Ok(summary)
}
