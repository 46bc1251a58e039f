use std::{path::PathBuf, time::Duration};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod simulation;

use config::{DEFAULT_CONFIG_PATH, SimulationConfig};
use simulation::{Simulation, Topology};

const COMPLETION_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
/// Simulate vendors releasing tickets into a bounded pool while customers buy them.
struct Opts {
    /// Configuration file, created with defaults if missing
    #[arg(long, env = "TICKET_SIM_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the total number of tickets
    #[arg(long)]
    total_tickets: Option<usize>,

    /// Override the tickets each vendor releases per cycle
    #[arg(long)]
    release_rate: Option<usize>,

    /// Override the tickets each customer buys per cycle
    #[arg(long)]
    retrieval_rate: Option<usize>,

    /// Override the pool capacity
    #[arg(long)]
    capacity: Option<usize>,

    /// Number of vendors (default: total tickets / release rate)
    #[arg(long)]
    vendors: Option<usize>,

    /// Number of customers (default: total tickets / retrieval rate)
    #[arg(long)]
    customers: Option<usize>,

    #[arg(long, default_value_t = 1000)]
    release_interval_ms: u64,

    #[arg(long, default_value_t = 1000)]
    retrieval_interval_ms: u64,

    /// How long stopped tasks get to finish before they are aborted
    #[arg(long, default_value_t = 5000)]
    grace_ms: u64,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save: bool,
}

impl Opts {
    fn apply(&self, config: &mut SimulationConfig) {
        if let Some(total) = self.total_tickets {
            config.total_tickets = total;
        }
        if let Some(rate) = self.release_rate {
            config.ticket_release_rate = rate;
        }
        if let Some(rate) = self.retrieval_rate {
            config.customer_retrieval_rate = rate;
        }
        if let Some(capacity) = self.capacity {
            config.max_ticket_capacity = capacity;
        }
    }

    fn topology(&self, config: &SimulationConfig) -> Topology {
        let derived = Topology::from_config(config);
        Topology {
            vendors: self.vendors.unwrap_or(derived.vendors),
            customers: self.customers.unwrap_or(derived.customers),
            release_interval: Duration::from_millis(self.release_interval_ms),
            retrieval_interval: Duration::from_millis(self.retrieval_interval_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts = Opts::parse();

    let mut config = SimulationConfig::load_or_default(&opts.config)?;
    opts.apply(&mut config);
    config.validate()?;
    if opts.save {
        config.save(&opts.config)?;
    }

    let simulation = Simulation::start(&config, &opts.topology(&config))?;
    info!(run_id = %simulation.run_id(), "press ctrl-c to stop the simulation early");

    tokio::select! {
        _ = simulation.wait_for_completion(COMPLETION_POLL_INTERVAL) => {
            info!("simulation complete, all tickets added and sold");
        }
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("interrupt received, stopping simulation"),
            Err(e) => {
                error!("failed to listen for ctrl_c: {}", e);
                simulation.wait_for_completion(COMPLETION_POLL_INTERVAL).await;
            }
        },
    }

    let summary = simulation.stop(Duration::from_millis(opts.grace_ms)).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
