use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::SimulatorError;

pub const DEFAULT_CONFIG_PATH: &str = "config/system_config.json";

/// Parameters of one simulation run, persisted as JSON between runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    /// Quota: tickets produced over the whole run.
    pub total_tickets: usize,
    /// Tickets each vendor releases per cycle.
    pub ticket_release_rate: usize,
    /// Tickets each customer tries to buy per cycle.
    pub customer_retrieval_rate: usize,
    /// Capacity of the pool.
    pub max_ticket_capacity: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            total_tickets: 100,
            ticket_release_rate: 10,
            customer_retrieval_rate: 5,
            max_ticket_capacity: 50,
        }
    }
}

impl SimulationConfig {
    pub fn load(path: &Path) -> Result<Self, SimulatorError> {
        let raw = fs::read_to_string(path)?;
        let config: SimulationConfig = serde_json::from_str(&raw)?;
        info!(path = %path.display(), ?config, "configuration loaded");
        Ok(config)
    }

    /// Load `path`, or write the defaults there and use them if the file does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self, SimulatorError> {
        if path.exists() {
            return Self::load(path);
        }
        warn!(path = %path.display(), "configuration not found, using the default configuration");
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), SimulatorError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SimulatorError> {
        let fields = [
            ("totalTickets", self.total_tickets),
            ("ticketReleaseRate", self.ticket_release_rate),
            ("customerRetrievalRate", self.customer_retrieval_rate),
            ("maxTicketCapacity", self.max_ticket_capacity),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(SimulatorError::InvalidConfig(format!("{} must be greater than 0", name))),
            None => Ok(()),
        }
    }

    /// Enough vendors to release the whole quota in one cycle, at least one.
    pub fn vendor_count(&self) -> usize {
        (self.total_tickets / self.ticket_release_rate.max(1)).max(1)
    }

    pub fn customer_count(&self) -> usize {
        (self.total_tickets / self.customer_retrieval_rate.max(1)).max(1)
    }
}
