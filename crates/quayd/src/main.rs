//! `quayd`, the Quay daemon.
//!
//! Serves a directory as a net-transport storage node and inspects the
//! registry held in the local metadata store.
//!
//! # Usage
//!
//! ```text
//! quayd agent                                # serve ~/.quay/agent on 0.0.0.0:4830
//! quayd agent -r /srv/node -l 127.0.0.1:4831 # second node on one host
//! quayd status                               # nodes, files, invariant check
//! quayd benchmark -n 200 -s 65536            # in-memory add/get benchmark
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quay_connector::{ConnectorFactory, NodeAgent};
use quay_engine::QuayServer;
use quay_meta::{MemoryMeta, MetaStore};
use quay_types::TransportType;
use tracing::{error, info};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "quayd", version, about = "Quay distributed file store daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a directory as a net-transport storage node.
    Agent {
        /// Directory to serve (created if missing).
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Listen address (e.g. "127.0.0.1:4831").
        #[arg(short, long, env = "QUAY_AGENT_LISTEN")]
        listen: Option<String>,
    },

    /// Show nodes and files from the local metadata store.
    Status,

    /// Run a quick add/get benchmark (in-memory).
    Benchmark {
        /// Number of files to add and read back.
        #[arg(short = 'n', long, default_value = "100")]
        count: usize,

        /// Size of each file in bytes.
        #[arg(short, long, default_value = "10240")]
        size: usize,

        /// Number of in-memory nodes to spread files over.
        #[arg(long, default_value = "3")]
        nodes: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Agent { root, listen } => {
            // CLI args override config file values.
            if let Some(root) = root {
                config.agent.root = Some(root);
            }
            if let Some(addr) = listen {
                config.agent.listen_addr = addr;
            }
            cmd_agent(&config).await
        }
        Commands::Status => cmd_status(&config).await,
        Commands::Benchmark { count, size, nodes } => {
            cmd_benchmark(&config, count, size, nodes).await
        }
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -----------------------------------------------------------------------
// quayd agent
// -----------------------------------------------------------------------

async fn cmd_agent(config: &CliConfig) -> Result<()> {
    let root = config.agent_root();
    let agent = NodeAgent::bind(config.agent.listen_addr.as_str(), &root)
        .await
        .with_context(|| {
            format!(
                "failed to start agent on {} serving {}",
                config.agent.listen_addr,
                root.display()
            )
        })?;

    let addr = agent.local_addr()?;
    println!("Serving {} on {addr}", root.display());
    println!("Register it with transport \"{}\" and address \"{addr}\"", TransportType::Net);

    agent
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(%e, "failed to listen for ctrl-c");
            }
        })
        .await?;

    info!("agent stopped");
    Ok(())
}

// -----------------------------------------------------------------------
// quayd status
// -----------------------------------------------------------------------

async fn cmd_status(config: &CliConfig) -> Result<()> {
    if config.meta.backend == "memory" {
        println!("Metadata backend is \"memory\": nothing is persisted.");
        return Ok(());
    }

    let meta_path = config.meta_path();
    let meta = MetaStore::open(&meta_path).map_err(|e| {
        error!(path = %meta_path.display(), %e, "failed to open metadata store");
        anyhow::anyhow!(
            "cannot open metadata at {}. Is another process using it? ({e})",
            meta_path.display(),
        )
    })?;

    let server = QuayServer::open(
        config.server_config(),
        Arc::new(meta),
        ConnectorFactory::standard(config.net_options()),
    )
    .context("failed to load registries")?;

    let nodes = server.list_nodes();
    println!("Nodes: {}", nodes.len());
    for node in &nodes {
        let reachable = match server.nodes().slot(&node.id)?.connector() {
            Ok(connector) => connector.probe().await,
            Err(_) => false,
        };
        println!(
            "  {} {} {} used={}/{} reachable={reachable}",
            node.id, node.transport, node.address, node.used, node.capacity,
        );
    }

    let files = server.list_all_files();
    println!("Files: {}", files.len());
    for entry in &files {
        println!("  {} ({} bytes)", entry.path, entry.size);
    }

    let violations = server.check_invariants();
    if violations.is_empty() {
        println!("Invariants: ok");
    } else {
        println!("Invariants: {} violation(s)", violations.len());
        for v in &violations {
            println!("  {v}");
        }
    }

    Ok(())
}

// -----------------------------------------------------------------------
// quayd benchmark
// -----------------------------------------------------------------------

async fn cmd_benchmark(config: &CliConfig, count: usize, size: usize, nodes: usize) -> Result<()> {
    anyhow::ensure!(nodes > 0, "need at least one node");

    println!("Quay Benchmark");
    println!("  files:  {count}");
    println!("  size:   {size} bytes each");
    println!("  nodes:  {nodes}");
    println!();

    // In-memory setup: measures pure coordinator throughput.
    let factory = ConnectorFactory::standard(config.net_options());
    let server = QuayServer::open(config.server_config(), Arc::new(MemoryMeta::new()), factory)?;
    for i in 0..nodes {
        server
            .add_node(&format!("bench-{i}"), None, u64::MAX / 2, TransportType::Memory)
            .await?;
    }

    let scratch = tempfile::tempdir()?;
    let source = scratch.path().join("source");
    tokio::fs::write(&source, generate_bench_data(size)).await?;
    let total_bytes = count as u64 * size as u64;

    // --- Write ---
    print!("Adding {count} files... ");
    let start = Instant::now();
    for i in 0..count {
        server.add_file(&source, &format!("/bench/file-{i}")).await?;
    }
    let write_dur = start.elapsed();
    let write_mbs = total_bytes as f64 / write_dur.as_secs_f64() / 1_048_576.0;
    println!("{:.2}s ({write_mbs:.1} MB/s)", write_dur.as_secs_f64());

    // --- Read ---
    print!("Reading {count} files... ");
    let out = scratch.path().join("out");
    let start = Instant::now();
    for i in 0..count {
        server.get_file(&format!("/bench/file-{i}"), &out).await?;
    }
    let read_dur = start.elapsed();
    let read_mbs = total_bytes as f64 / read_dur.as_secs_f64() / 1_048_576.0;
    println!("{:.2}s ({read_mbs:.1} MB/s)", read_dur.as_secs_f64());

    println!();
    println!("Summary:");
    println!("  Write throughput: {write_mbs:.1} MB/s");
    println!("  Read throughput:  {read_mbs:.1} MB/s");
    println!(
        "  Total data:       {:.1} MB",
        total_bytes as f64 / 1_048_576.0
    );
    for node in server.list_nodes() {
        println!("  {} {}: {} bytes", node.id, node.address, node.used);
    }

    Ok(())
}

/// Generate deterministic test data for benchmarking.
fn generate_bench_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
