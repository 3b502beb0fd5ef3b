//! Ethereum Fund-Flow Tracer CLI
//!
//! Traces value flows from a root address through an Etherscan-compatible
//! explorer and writes layered traces plus Sankey diagram data.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use eth_flow_trace::config::{TracerConfig, OPEN_END_BLOCK};
use eth_flow_trace::explorer::EtherscanClient;
use eth_flow_trace::export::{
    find_existing_trace, read_trace, run_folder, trace_file_stem, write_trace_csv,
    write_trace_parquet,
};
use eth_flow_trace::render::SankeyDiagram;
use eth_flow_trace::schemas::{Trace, TraceDirection, TraceMetadata, TransferKind};
use eth_flow_trace::traversal::TraceEngine;
use eth_flow_trace::window::{Month, MonthWindow};

#[derive(Parser)]
#[command(name = "eth-flow-trace")]
#[command(version)]
#[command(about = "Layered fund-flow tracing over Etherscan-compatible explorers", long_about = None)]
struct Cli {
    /// Path to configuration file (optional, uses env vars if not provided)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output directory for traces (overrides the config file)
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    In,
    Out,
    All,
}

impl From<DirectionArg> for TraceDirection {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::In => TraceDirection::In,
            DirectionArg::Out => TraceDirection::Out,
            DirectionArg::All => TraceDirection::All,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Native,
    Token,
}

impl From<KindArg> for TransferKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Native => TransferKind::Native,
            KindArg::Token => TransferKind::Token,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Trace fund flows from a root address
    Trace {
        /// Root wallet address
        address: String,

        /// Deepest layer to explore (1-10)
        #[arg(short, long)]
        depth: Option<u32>,

        /// Follow senders (in), recipients (out) or both
        #[arg(long, value_enum)]
        direction: Option<DirectionArg>,

        /// Largest transfers kept per address (0 = all)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Native transfers or ERC-20 token transfers
        #[arg(long, value_enum)]
        kind: Option<KindArg>,

        /// First month of the window (YYYY-MM, default: full history)
        #[arg(long)]
        from: Option<String>,

        /// Last month of the window (YYYY-MM, default: current month)
        #[arg(long)]
        to: Option<String>,

        /// Start at genesis even when --from is given
        #[arg(long)]
        full_history: bool,

        /// Keep transactions that carry call data
        #[arg(long)]
        include_contract_calls: bool,

        /// Trace again even if a saved trace exists
        #[arg(long)]
        force: bool,

        /// Inbound layers shown in the diagram (default: all)
        #[arg(long)]
        in_layers: Option<u32>,

        /// Outbound layers shown in the diagram (default: all)
        #[arg(long)]
        out_layers: Option<u32>,
    },

    /// Build Sankey diagram data from a saved trace
    Render {
        /// Trace file (.csv or .parquet); defaults to the newest saved trace of --address
        input: Option<PathBuf>,

        /// Root address whose newest saved trace is rendered
        #[arg(short, long)]
        address: Option<String>,

        #[arg(long)]
        in_layers: Option<u32>,

        #[arg(long)]
        out_layers: Option<u32>,

        /// Output JSON path (default: next to the trace)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show saved traces for an address
    Status {
        /// Root wallet address
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => TracerConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => TracerConfig::load().context("Failed to load config from environment")?,
    };

    if let Some(dir) = &cli.output_dir {
        config.paths.output_dir = dir.clone();
    }

    match cli.command {
        Commands::Trace {
            address,
            depth,
            direction,
            top_k,
            kind,
            from,
            to,
            full_history,
            include_contract_calls,
            force,
            in_layers,
            out_layers,
        } => {
            config.trace.root_address = address;
            if let Some(depth) = depth {
                config.trace.max_depth = depth;
            }
            if let Some(direction) = direction {
                config.trace.direction = direction.into();
            }
            if let Some(top_k) = top_k {
                config.trace.top_k_per_address = top_k;
            }
            if let Some(kind) = kind {
                config.trace.kind = kind.into();
            }
            if include_contract_calls {
                config.trace.pure_transfers_only = false;
            }

            let window = month_window(from.as_deref(), to.as_deref(), full_history)?;
            cmd_trace(&mut config, window, force, (in_layers, out_layers)).await?;
        }
        Commands::Render {
            input,
            address,
            in_layers,
            out_layers,
            output,
        } => {
            cmd_render(&config, input, address, (in_layers, out_layers), output)?;
        }
        Commands::Status { address } => {
            cmd_status(&config, &address)?;
        }
    }

    Ok(())
}

/// Window for `trace`; without `--from` it spans the full history
fn month_window(from: Option<&str>, to: Option<&str>, full_history: bool) -> Result<MonthWindow> {
    let end = match to {
        Some(to) => Month::parse(to)?,
        None => Month::of(Utc::now()),
    };
    let start = match from {
        Some(_) if full_history => {
            warn!("--full-history set; ignoring --from");
            None
        }
        Some(from) => Some(Month::parse(from)?),
        None => None,
    };
    Ok(MonthWindow::new(start, end))
}

async fn cmd_trace(
    config: &mut TracerConfig,
    window: MonthWindow,
    force: bool,
    layers: (Option<u32>, Option<u32>),
) -> Result<()> {
    info!("=== Tracing {} ===", config.trace.root_address.trim());

    config.validate_settings().context("Invalid configuration")?;
    config.ensure_directories()?;
    let root = config.trace.root_address.trim().to_string();

    if !force {
        if let Some(existing) = find_existing_trace(&config.paths.output_dir, &root)? {
            info!(
                "Reusing saved trace {:?} (pass --force to trace again)",
                existing.path
            );
            let trace = read_trace(&existing.path)
                .with_context(|| format!("Failed to read {:?}", existing.path))?;
            write_diagram(&trace, &existing.path.with_extension("sankey.json"), layers)?;
            return Ok(());
        }
    }

    config.validate().context("Invalid configuration")?;
    let client = EtherscanClient::new(config.explorer.clone())
        .context("Failed to build explorer client")?;

    let (start_block, end_block) = window.resolve_blocks(&client).await;
    config.trace.start_block = start_block;
    config.trace.end_block = if end_block == 0 {
        OPEN_END_BLOCK
    } else {
        end_block
    };
    config.trace.validate().context("Invalid block range")?;

    info!(
        "Parameters: direction={}, max_depth={}, top_k={}, kind={:?}, blocks {}..{}",
        config.trace.direction,
        config.trace.max_depth,
        config.trace.top_k_per_address,
        config.trace.kind,
        config.trace.start_block,
        config.trace.end_block
    );

    let engine = TraceEngine::new(client, &config.explorer, config.trace.clone());
    let mut trace = Trace::new();
    let reports = engine.run(&mut trace).await.context("Trace failed")?;

    if trace.is_empty() {
        warn!("No transactions matched; try --include-contract-calls or a wider window");
    }

    let folder = run_folder(&config.paths.output_dir, &root, Utc::now());
    std::fs::create_dir_all(&folder)?;
    let stem = trace_file_stem(&root, &trace, window.naming_range());

    let csv_path = folder.join(format!("{}.csv", stem));
    let parquet_path = folder.join(format!("{}.parquet", stem));
    write_trace_csv(&trace, &csv_path).context("Failed to write trace CSV")?;
    write_trace_parquet(&trace, &parquet_path).context("Failed to write trace Parquet")?;

    // Write metadata
    let mut metadata = TraceMetadata::new(&config.trace);
    metadata.record_counts.edges = trace.len();
    for report in &reports {
        match report.direction {
            TraceDirection::In => metadata.record_counts.visited_upstream = report.visited.len(),
            _ => metadata.record_counts.visited_downstream = report.visited.len(),
        }
        metadata.record_counts.fetch_failures += report.failed.len();
        metadata.record_counts.warnings += report.warnings.len();
        for warning in &report.warnings {
            warn!("{}", warning);
        }
    }
    let metadata_path = folder.join(format!("{}.metadata.json", stem));
    metadata.save(&metadata_path)?;

    write_diagram(&trace, &folder.join(format!("{}.sankey.json", stem)), layers)?;

    info!("=== Trace Complete ===");
    info!(
        "{} edges, {} upstream / {} downstream addresses, {} fetch failures",
        metadata.record_counts.edges,
        metadata.record_counts.visited_upstream,
        metadata.record_counts.visited_downstream,
        metadata.record_counts.fetch_failures
    );
    info!("Trace saved to {:?}", csv_path);
    info!("Metadata saved to {:?}", metadata_path);

    Ok(())
}

fn write_diagram(trace: &Trace, path: &Path, layers: (Option<u32>, Option<u32>)) -> Result<()> {
    let diagram = SankeyDiagram::build(
        trace.edges(),
        layers.0.unwrap_or(u32::MAX),
        layers.1.unwrap_or(u32::MAX),
    );
    diagram
        .save(path)
        .with_context(|| format!("Failed to write diagram {:?}", path))?;
    info!(
        "Diagram with {} nodes and {} links saved to {:?}",
        diagram.nodes.len(),
        diagram.links.len(),
        path
    );
    Ok(())
}

fn cmd_render(
    config: &TracerConfig,
    input: Option<PathBuf>,
    address: Option<String>,
    layers: (Option<u32>, Option<u32>),
    output: Option<PathBuf>,
) -> Result<()> {
    let input = match (input, address) {
        (Some(path), _) => path,
        (None, Some(address)) => find_existing_trace(&config.paths.output_dir, &address)?
            .map(|found| found.path)
            .with_context(|| format!("No saved trace for {} in {:?}", address, config.paths.output_dir))?,
        (None, None) => anyhow::bail!("Pass a trace file or --address"),
    };

    let trace = read_trace(&input).with_context(|| format!("Failed to read {:?}", input))?;
    let output = output.unwrap_or_else(|| input.with_extension("sankey.json"));
    write_diagram(&trace, &output, layers)
}

fn cmd_status(config: &TracerConfig, address: &str) -> Result<()> {
    info!("=== Trace Status ===");
    info!("Output directory: {:?}", config.paths.output_dir);

    let Some(existing) = find_existing_trace(&config.paths.output_dir, address)? else {
        info!("  {} no saved trace for {}", "✗", address);
        return Ok(());
    };

    let size_kb = std::fs::metadata(&existing.path)?.len() / 1024;
    info!(
        "  {} {:?} ({}-{:02} to {}-{:02}, {} KB)",
        "✓",
        existing.path,
        existing.span.start_year,
        existing.span.start_month,
        existing.span.end_year,
        existing.span.end_month,
        size_kb
    );

    match read_trace(&existing.path) {
        Ok(trace) => {
            let max_layer = trace.iter().map(|e| e.layer).max().unwrap_or(0);
            info!("  {} edges across {} layers", trace.len(), max_layer);
            if let Some((first, last)) = trace.time_range() {
                info!("  Activity from {} to {}", first, last);
            }
        }
        Err(e) => warn!("  Could not read trace: {}", e),
    }

    let metadata_path = existing.path.with_extension("metadata.json");
    if metadata_path.exists() {
        info!("  {} {:?}", "✓", metadata_path);
    } else {
        info!("  {} metadata", "✗");
    }

    Ok(())
}
