use std::{sync::Arc, time::Duration};

use serde::Serialize;
use ticket_pool::{
    BoundedTicketPool, Customer, DEFAULT_RELEASE_INTERVAL, DEFAULT_RETRIEVAL_INTERVAL, PoolStats, TaskState, Vendor,
};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{config::SimulationConfig, errors::SimulatorError};

/// How many tasks of each kind to spawn and how fast they cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Topology {
    pub vendors: usize,
    pub customers: usize,
    pub release_interval: Duration,
    pub retrieval_interval: Duration,
}

impl Topology {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            vendors: config.vendor_count(),
            customers: config.customer_count(),
            release_interval: DEFAULT_RELEASE_INTERVAL,
            retrieval_interval: DEFAULT_RETRIEVAL_INTERVAL,
        }
    }

    fn validate(&self) -> Result<(), SimulatorError> {
        if self.vendors == 0 || self.customers == 0 {
            return Err(SimulatorError::InvalidConfig(format!(
                "a run needs at least one vendor and one customer, got {} vendors and {} customers",
                self.vendors, self.customers
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TaskSummary {
    pub label: String,
    pub tickets: usize,
    pub state: TaskState,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub completed: bool,
    pub stats: PoolStats,
    pub vendors: Vec<TaskSummary>,
    pub customers: Vec<TaskSummary>,
}

/// One running simulation: a pool plus the vendor and customer tasks bound to it.
pub struct Simulation {
    run_id: Uuid,
    pool: Arc<BoundedTicketPool>,
    vendors: Vec<Arc<Vendor>>,
    customers: Vec<Arc<Customer>>,
    tasks: JoinSet<()>,
}

impl Simulation {
    /// Build a fresh pool and start a run on it. Must be called from within a tokio runtime.
    pub fn start(config: &SimulationConfig, topology: &Topology) -> Result<Self, SimulatorError> {
        config.validate()?;
        let pool = BoundedTicketPool::new(config.max_ticket_capacity, config.total_tickets)?;
        Self::launch(Arc::new(pool), config, topology)
    }

    /// Reset an existing pool and start a new run on it.
    ///
    /// Every task of the pool's previous run must already be stopped.
    pub fn start_on(
        pool: Arc<BoundedTicketPool>,
        config: &SimulationConfig,
        topology: &Topology,
    ) -> Result<Self, SimulatorError> {
        config.validate()?;
        pool.reset(config.max_ticket_capacity, config.total_tickets)?;
        Self::launch(pool, config, topology)
    }

    fn launch(pool: Arc<BoundedTicketPool>, config: &SimulationConfig, topology: &Topology) -> Result<Self, SimulatorError> {
        topology.validate()?;
        let run_id = Uuid::new_v4();

        // construct everything before spawning so a bad parameter never leaves a partial run
        let vendors = (1..=topology.vendors)
            .map(|i| {
                Vendor::new(format!("Vendor-{}", i), config.ticket_release_rate, pool.clone())
                    .map(|v| Arc::new(v.with_release_interval(topology.release_interval)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let customers = (1..=topology.customers)
            .map(|i| {
                Customer::new(
                    format!("Customer-{}", i),
                    config.customer_retrieval_rate,
                    topology.retrieval_interval,
                    pool.clone(),
                )
                .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let span = info_span!("simulation", %run_id);
        let mut tasks = JoinSet::new();
        for vendor in &vendors {
            let vendor = vendor.clone();
            tasks.spawn(async move { vendor.run().await }.instrument(span.clone()));
        }
        for customer in &customers {
            let customer = customer.clone();
            tasks.spawn(async move { customer.run().await }.instrument(span.clone()));
        }

        info!(%run_id, ?config, vendors = vendors.len(), customers = customers.len(), "simulation started");
        Ok(Self { run_id, pool, vendors, customers, tasks })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn pool(&self) -> Arc<BoundedTicketPool> {
        self.pool.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.pool.is_complete()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Poll the pool until every ticket has been produced and sold, or the pool is stopped.
    pub async fn wait_for_completion(&self, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if self.pool.is_complete() || self.pool.is_stopped() {
                break;
            }
            debug!(stats = ?self.pool.stats(), "simulation in progress");
        }
    }

    /// Stop every task and the pool, then wait up to `grace` for the tasks to return.
    ///
    /// Tasks still running after `grace` are aborted and the run ends with
    /// [`SimulatorError::ShutdownTimeout`].
    pub async fn stop(mut self, grace: Duration) -> Result<RunSummary, SimulatorError> {
        for vendor in &self.vendors {
            vendor.stop();
        }
        for customer in &self.customers {
            customer.stop();
        }
        self.pool.stop();

        if tokio::time::timeout(grace, drain(&mut self.tasks)).await.is_err() {
            warn!(run_id = %self.run_id, ?grace, "tasks did not stop in time, aborting");
            self.tasks.abort_all();
            drain(&mut self.tasks).await;
            return Err(SimulatorError::ShutdownTimeout(grace));
        }

        let summary = self.summary();
        info!(run_id = %self.run_id, completed = summary.completed, stats = ?summary.stats, "simulation stopped");
        Ok(summary)
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            completed: self.pool.is_complete(),
            stats: self.pool.stats(),
            vendors: self
                .vendors
                .iter()
                .map(|v| TaskSummary { label: v.label().to_string(), tickets: v.released(), state: v.state() })
                .collect(),
            customers: self
                .customers
                .iter()
                .map(|c| TaskSummary { label: c.label().to_string(), tickets: c.purchased_count(), state: c.state() })
                .collect(),
        }
    }
}

/// Join every task. A task cancelled by the runtime counts as a clean stop.
async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => debug!("task cancelled"),
            Err(e) => error!(error = %e, "task panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: Duration = Duration::from_millis(1);
    const BOUND: Duration = Duration::from_secs(30);

    fn fast_topology(config: &SimulationConfig) -> Topology {
        Topology { release_interval: FAST, retrieval_interval: FAST, ..Topology::from_config(config) }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn default_config_runs_to_completion() {
        let config = SimulationConfig::default();
        let simulation = Simulation::start(&config, &fast_topology(&config)).unwrap();

        tokio::time::timeout(BOUND, simulation.wait_for_completion(FAST)).await.unwrap();
        assert!(simulation.is_complete());

        let summary = simulation.stop(Duration::from_secs(2)).await.unwrap();
        assert!(summary.completed);
        assert_eq!((summary.stats.produced, summary.stats.sold), (100, 100));
        assert_eq!(summary.vendors.len(), 10);
        assert_eq!(summary.customers.len(), 20);
        assert_eq!(summary.vendors.iter().map(|v| v.tickets).sum::<usize>(), 100);
        assert_eq!(summary.customers.iter().map(|c| c.tickets).sum::<usize>(), 100);
        assert!(summary.customers.iter().all(|c| c.state == TaskState::Stopped));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_mid_flight_reports_consistent_counters() {
        let config = SimulationConfig {
            total_tickets: 10_000,
            ticket_release_rate: 5,
            customer_retrieval_rate: 2,
            max_ticket_capacity: 20,
        };
        let topology = Topology { vendors: 4, customers: 4, ..fast_topology(&config) };
        let simulation = Simulation::start(&config, &topology).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let summary = simulation.stop(Duration::from_secs(2)).await.unwrap();
        assert!(!summary.completed);
        assert!(summary.stats.sold <= summary.stats.produced);
        assert_eq!(summary.stats.in_pool, summary.stats.produced - summary.stats.sold);
        assert!(summary.vendors.iter().chain(&summary.customers).all(|t| t.state == TaskState::Stopped));
    }

    #[tokio::test]
    async fn bad_parameters_fail_before_any_task_starts() {
        let config = SimulationConfig::default();

        let zero_interval = Topology { retrieval_interval: Duration::ZERO, ..fast_topology(&config) };
        assert!(matches!(Simulation::start(&config, &zero_interval), Err(SimulatorError::Pool(_))));

        let no_customers = Topology { customers: 0, ..fast_topology(&config) };
        assert!(matches!(Simulation::start(&config, &no_customers), Err(SimulatorError::InvalidConfig(_))));

        let zero_capacity = SimulationConfig { max_ticket_capacity: 0, ..config };
        assert!(matches!(
            Simulation::start(&zero_capacity, &fast_topology(&config)),
            Err(SimulatorError::InvalidConfig(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_is_reset_for_the_next_run() {
        let first = SimulationConfig { total_tickets: 30, ..Default::default() };
        let simulation = Simulation::start(&first, &fast_topology(&first)).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let pool = simulation.pool();
        simulation.stop(Duration::from_secs(2)).await.unwrap();
        assert!(pool.is_stopped());

        let second = SimulationConfig { total_tickets: 40, max_ticket_capacity: 8, ..Default::default() };
        let simulation = Simulation::start_on(pool.clone(), &second, &fast_topology(&second)).unwrap();
        assert!(!pool.is_stopped());

        tokio::time::timeout(BOUND, simulation.wait_for_completion(FAST)).await.unwrap();
        let summary = simulation.stop(Duration::from_secs(2)).await.unwrap();
        assert_eq!(summary.stats.capacity, 8);
        assert_eq!((summary.stats.produced, summary.stats.sold), (40, 40));
    }
}
