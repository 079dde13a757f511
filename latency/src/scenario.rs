//! Run the latency test for a group of peers sharing a [simulated](crate::bus::simulated) bus.

use crate::{
    bus::simulated::{self, Link, Network},
    gateway::transport,
    report::Report,
    scheduler::serials_fit,
    wire::{self, valid_name},
    Config, Engine, Error,
};
use commonware_runtime::{Clock, Metrics, Spawner};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, time::Duration};
use tracing::info;

fn default_rounds() -> u32 {
    1
}

/// Latency applied to every link between two peers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Mean one-way latency in milliseconds.
    pub latency_mean: f64,

    /// Standard deviation of the one-way latency in milliseconds.
    pub latency_stddev: f64,
}

/// A latency test to run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub peers: Vec<String>,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default)]
    pub payload_size: usize,
    #[serde(default)]
    pub link: Option<LinkConfig>,
    #[serde(default)]
    pub stall_timeout_ms: Option<u64>,
    #[serde(default)]
    pub seed: u64,
}

impl Scenario {
    /// Ensure the scenario can be run.
    pub fn validate(&self) -> Result<(), Error> {
        if self.peers.is_empty() {
            return Err(Error::InvalidConfig("no peers".into()));
        }
        let mut seen = HashSet::new();
        for peer in &self.peers {
            if !valid_name(peer) {
                return Err(Error::InvalidConfig(format!("invalid peer name: {peer:?}")));
            }
            if !seen.insert(peer) {
                return Err(Error::InvalidConfig(format!("duplicate peer: {peer}")));
            }
        }
        if !serials_fit(self.rounds, self.peers.len()) {
            return Err(Error::InvalidConfig(format!(
                "too many rounds for {} peers: {}",
                self.peers.len(),
                self.rounds
            )));
        }
        if let Some(link) = self.link {
            if link.latency_mean < 0.0 || link.latency_stddev < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "invalid link (mean={}, stddev={})",
                    link.latency_mean, link.latency_stddev
                )));
            }
        }
        Ok(())
    }

    fn max_message_size(&self) -> usize {
        wire::max_message_size(self.payload_size)
    }
}

/// Run `scenario` to completion, returning the report of every peer (in configuration order).
pub async fn simulate<E: Spawner + Clock + Rng + Metrics>(
    context: E,
    scenario: &Scenario,
) -> Result<Vec<Report>, Error> {
    scenario.validate()?;

    // Set up the bus
    let mut network = Network::new(
        context.with_label("network"),
        simulated::Config {
            max_message_size: scenario.max_message_size(),
        },
    );
    let mut endpoints = Vec::with_capacity(scenario.peers.len());
    for peer in &scenario.peers {
        endpoints.push(network.register(peer).map_err(transport)?);
    }
    if let Some(link) = scenario.link {
        let link = Link {
            latency_mean: link.latency_mean,
            latency_stddev: link.latency_stddev,
        };
        for sender in &scenario.peers {
            for receiver in &scenario.peers {
                if sender != receiver {
                    network.link(sender, receiver, link).map_err(transport)?;
                }
            }
        }
    }
    let registry = network.peers();
    network.start();
    info!(peers = registry.len(), rounds = scenario.rounds, "starting");

    // Start every peer
    let stall_timeout = scenario.stall_timeout_ms.map(Duration::from_millis);
    let mut handles = Vec::with_capacity(endpoints.len());
    for (index, (peer, endpoint)) in scenario.peers.iter().zip(endpoints).enumerate() {
        let cfg = Config {
            name: peer.clone(),
            peers: scenario
                .peers
                .iter()
                .filter(|other| *other != peer)
                .cloned()
                .collect(),
            payload_size: scenario.payload_size,
            rounds: scenario.rounds,
            stall_timeout,
        };
        let engine = Engine::new(
            context.with_label(&format!("peer_{index}")),
            cfg,
            registry.clone(),
            endpoint,
        );
        handles.push(engine.start());
    }

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        reports.push(handle.await??);
    }
    Ok(reports)
}
