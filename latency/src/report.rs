//! Results of a completed latency test.

use crate::{ledger::Ledger, roster::Roster, Time};
use std::{collections::BTreeMap, time::Duration};

/// Everything a peer learned during the test.
#[derive(Clone, Debug)]
pub struct Report {
    /// Name of the peer that produced the report.
    pub name: String,

    /// Turn order used during the test.
    pub roster: Roster,

    /// Every probe sent by this peer.
    pub ledger: Ledger,

    /// Logical time once the test finished.
    pub final_time: Time,
}

/// Distribution of round-trip latencies (in milliseconds).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Latency {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
}

impl Latency {
    /// Returns the distribution of `samples`, or `None` if there are none.
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut millis: Vec<f64> = samples.iter().map(|d| millis(*d)).collect();
        millis.sort_by(f64::total_cmp);
        let mean = mean(&millis);
        Some(Self {
            min: millis[0],
            max: millis[millis.len() - 1],
            mean,
            median: median(&millis),
            std_dev: std_dev(&millis, mean),
        })
    }
}

/// Aggregate view of a [Report].
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    /// Number of probes sent.
    pub probes: usize,

    /// Number of probes acknowledged by every responder.
    pub complete: usize,

    /// Number of acknowledgements received.
    pub responses: usize,

    /// Latency over every acknowledgement received.
    pub latency: Option<Latency>,
}

impl Report {
    pub fn new(name: String, roster: Roster, ledger: Ledger, final_time: Time) -> Self {
        Self {
            name,
            roster,
            ledger,
            final_time,
        }
    }

    pub fn summary(&self) -> Summary {
        let events = self.ledger.events();
        let samples: Vec<Duration> = events
            .iter()
            .flat_map(|event| event.responses())
            .map(|response| response.latency)
            .collect();
        Summary {
            probes: events.len(),
            complete: events.iter().filter(|event| event.is_complete()).count(),
            responses: samples.len(),
            latency: Latency::from_samples(&samples),
        }
    }

    /// Returns the latency to each responder, keyed by name.
    pub fn by_responder(&self) -> BTreeMap<String, Latency> {
        let mut samples: BTreeMap<String, Vec<Duration>> = BTreeMap::new();
        for event in self.ledger.events() {
            for response in event.responses() {
                samples
                    .entry(response.responder)
                    .or_default()
                    .push(response.latency);
            }
        }
        samples
            .into_iter()
            .filter_map(|(responder, samples)| {
                Latency::from_samples(&samples).map(|latency| (responder, latency))
            })
            .collect()
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1_000.0
}

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

/// Expects `data` to be sorted.
fn median(data: &[f64]) -> f64 {
    let mid = data.len() / 2;
    if data.len() % 2 == 0 {
        (data[mid - 1] + data[mid]) / 2.0
    } else {
        data[mid]
    }
}

fn std_dev(data: &[f64], mean: f64) -> f64 {
    let variance = data
        .iter()
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum::<f64>()
        / data.len() as f64;
    variance.sqrt()
}
