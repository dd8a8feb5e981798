//! gridmesh CLI
//!
//! Drives a self-contained grid simulation: builds a synthetic network,
//! pumps sensor batches through the control loop, balances and optimizes on
//! a cadence, and prints JSON reports.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gridmesh::control::System;
use gridmesh::persistence::{ChannelSink, SqliteSink};
use gridmesh::ports::{PersistenceSink, SensorSource, SystemClock};
use gridmesh::routing::Algorithm;
use gridmesh::sensors::SensorSimulator;
use gridmesh::{GridConfig, NodeId, Result};

#[derive(Parser)]
#[command(name = "gridmesh")]
#[command(about = "Reactive control plane for electrical distribution networks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter, e.g. "info" or "gridmesh=debug"
    #[arg(long, default_value = "info")]
    log: String,

    /// Optional SQLite file receiving the persistence side-channel
    #[arg(long)]
    db: Option<String>,

    /// Seed for the synthetic sensor fleet
    #[arg(long, default_value = "42")]
    seed: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reactive loop over a synthetic grid
    Run {
        #[arg(long, default_value = "60")]
        nodes: usize,

        #[arg(long, default_value = "20")]
        ticks: u32,

        /// Milliseconds between sensor batches
        #[arg(long, default_value = "250")]
        interval_ms: u64,

        /// Seed per-node demand history for forecasting
        #[arg(long)]
        train_ml: bool,
    },

    /// Route between two nodes of a freshly built synthetic grid
    Route {
        src: String,
        dst: String,

        #[arg(long, default_value = "dijkstra")]
        algo: String,

        #[arg(long, default_value = "40")]
        nodes: usize,

        /// Also compute k redundant failover paths
        #[arg(long, default_value = "0")]
        redundant: usize,
    },

    /// Component statistics for a freshly built synthetic grid
    Stats {
        #[arg(long, default_value = "40")]
        nodes: usize,
    },
}

fn build_system(db: Option<&str>) -> Result<System> {
    let sink: Box<dyn PersistenceSink> = match db {
        Some(path) => Box::new(ChannelSink::spawn(Box::new(SqliteSink::open(path)?))),
        None => Box::new(gridmesh::ports::NullSink),
    };
    Ok(System::new(GridConfig::default(), sink, Arc::new(SystemClock)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    use tracing_subscriber::{fmt, EnvFilter};
    fmt().with_env_filter(EnvFilter::new(&cli.log)).init();

    let system = build_system(cli.db.as_deref())?;
    let mut simulator = SensorSimulator::new(cli.seed, Arc::new(SystemClock));

    match cli.command {
        Commands::Run {
            nodes,
            ticks,
            interval_ms,
            train_ml,
        } => {
            let report = system.init(nodes, train_ml, &mut simulator)?;
            tracing::info!(
                nodes = report.topology.node_count,
                edges = report.topology.edge_count,
                "running control loop"
            );

            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
            for tick in 0..ticks {
                interval.tick().await;
                for reading in simulator.batch() {
                    if let Err(e) = system.on_reading(reading) {
                        tracing::warn!("reading rejected: {}", e);
                    }
                }
                if tick % 5 == 4 {
                    let balance = system.balance_now()?;
                    tracing::info!(
                        overloaded = balance.report.overloaded,
                        balanced = balance.report.balanced,
                        events_cleared = balance.events_cleared,
                        "balance cycle"
                    );
                }
                if tick % 10 == 9 {
                    let optimize = system.optimize_now()?;
                    tracing::info!(
                        optimizations = optimize.report.optimizations_performed,
                        gain = optimize.report.total_efficiency_gain,
                        "optimize cycle"
                    );
                }
            }

            println!("{}", serde_json::to_string_pretty(&system.stats())?);
            println!("{}", serde_json::to_string_pretty(&system.benchmark_summary())?);
        }

        Commands::Route {
            src,
            dst,
            algo,
            nodes,
            redundant,
        } => {
            system.init(nodes, false, &mut simulator)?;
            let algorithm = Algorithm::from_str(&algo)?;
            let (src, dst) = (NodeId::from(src), NodeId::from(dst));
            let response = system.route(&src, &dst, algorithm)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if redundant > 0 {
                let routes = system.route_redundant(&src, &dst, redundant)?;
                println!("{}", serde_json::to_string_pretty(&routes)?);
            }
        }

        Commands::Stats { nodes } => {
            system.init(nodes, false, &mut simulator)?;
            println!("{}", serde_json::to_string_pretty(&system.stats())?);
        }
    }

    Ok(())
}
