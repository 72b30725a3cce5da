use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};
use node_harvest::{
    config::{read_sources, AppConfig, DEFAULT_CONFIG_PATH, DEFAULT_SOURCES_PATH},
    node::output::render_combined,
    classify, dedupe_buckets, NodeParser, Pipeline,
};
use std::path::{Path, PathBuf};

/// Collects proxy nodes from subscriptions, deduplicates and classifies them by protocol
#[derive(Parser)]
#[command(name = "node-harvest", version)]
#[command(about = "Collects proxy nodes from subscriptions, deduplicates and classifies them by protocol")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (JSON)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (error, warn, info, debug); RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,

    /// File listing one source address per line
    #[arg(short, long, default_value = DEFAULT_SOURCES_PATH)]
    sources: PathBuf,

    /// Output directory for deduplicated files
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for pre-dedup snapshots
    #[arg(long)]
    raw_dir: Option<PathBuf>,

    /// Do not write pre-dedup snapshots
    #[arg(long)]
    no_raw: bool,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Number of sources fetched at once
    #[arg(short = 'n', long)]
    concurrency: Option<usize>,

    /// Attempts per source
    #[arg(long)]
    retries: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every source and write per-protocol files (default)
    Run,
    /// Parse a local file and print canonical node lines
    Parse {
        /// Input file in any supported source format
        input: PathBuf,
        /// Write the lines to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(output) = &self.output {
            config.output.directory = output.to_string_lossy().into_owned();
        }
        if let Some(raw_dir) = &self.raw_dir {
            config.output.raw_directory = raw_dir.to_string_lossy().into_owned();
        }
        if self.no_raw {
            config.output.save_raw_files = false;
        }
        if self.no_progress {
            config.logging.show_progress = false;
        }
        if let Some(concurrency) = self.concurrency {
            config.network.concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            config.network.retries = retries;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut config);

    env_logger::init_from_env(Env::default().default_filter_or(config.logging.level.as_str()));
    if !cli.config.exists() {
        warn!(
            "Config file {} not found, using defaults",
            cli.config.display()
        );
    }

    if let Err(e) = run(cli, config).await {
        error!("Run failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        Some(Commands::Parse { input, output }) => {
            let parser = NodeParser::with_config(config.parser_config());
            let nodes = parser.parse_file(&input)?;
            let buckets = dedupe_buckets(classify(nodes));
            for (protocol, nodes) in &buckets {
                eprintln!("{}: {}", protocol, nodes.len());
            }

            let lines = render_combined(&buckets);
            match output {
                Some(output_path) => {
                    std::fs::write(&output_path, lines.join("\n"))?;
                    info!("Saved {} nodes to {:?}", lines.len(), output_path);
                }
                None => {
                    for line in &lines {
                        println!("{}", line);
                    }
                }
            }
        }
        Some(Commands::Run) | None => run_pipeline(&config, &cli.sources).await?,
    }

    Ok(())
}

async fn run_pipeline(config: &AppConfig, sources_path: &Path) -> Result<()> {
    info!("=== node-harvest starting ===");
    info!(
        "Config: timeout={}ms, retries={}, concurrency={}",
        config.network.timeout, config.network.retries, config.network.concurrency
    );

    let sources = read_sources(sources_path)?;
    info!("Read {} source addresses from {:?}", sources.len(), sources_path);

    let pipeline = Pipeline::from_config(config)?;
    let summary = pipeline.run(&sources).await?;

    info!(
        "=== Done: {} sources ({} failed), {} nodes -> {} after dedup ===",
        summary.sources,
        summary.failed_sources,
        summary.total_original(),
        summary.total_deduplicated()
    );
    Ok(())
}
