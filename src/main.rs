use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::info;

use cohsim::commons::{Protocol, SystemConfig};
use cohsim::sim::Simulator;
use cohsim::trace;

/// Cycle-accurate simulator for bus-based snooping cache coherence.
#[derive(Parser, Debug)]
#[command(name = "cohsim", version)]
struct Cli {
    /// Coherence protocol: MESI or Dragon.
    protocol: Protocol,

    /// Base name of the trace files ({base}_0.data .. {base}_3.data).
    file_base: String,

    /// Total cache size in bytes (power of two).
    cache_size: u32,

    /// Number of ways per set.
    associativity: u32,

    /// Block size in bytes (power of two, at least one word).
    block_size: u32,
}

fn main() -> Result<()> {
    env_logger::init_from_env(Env::default().filter_or("COHSIM_LOG", "warn"));

    let cli = Cli::parse();
    let cfg = SystemConfig::new(cli.protocol, cli.cache_size, cli.associativity, cli.block_size)?;
    let traces = trace::load_traces(&cli.file_base)?;
    info!(
        "loaded {} instructions across {} traces",
        traces.iter().map(|t| t.len()).sum::<usize>(),
        traces.len()
    );

    let mut sim = Simulator::new(cfg, traces);
    let report = sim.run();
    report.print();
    Ok(())
}
