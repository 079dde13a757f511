//! Measure round-trip latency between peers taking turns on a logical clock.
//!
//! Every peer sorts the names of all participants to derive the same turn order without
//! any election. At logical time `t`, the peer at index `t mod peers` is the _sender_: it
//! broadcasts a [wire::Message::Probe] and waits for an [wire::Message::Ack] from every
//! other peer. Everyone else is a _responder_: it requests the advance to `t + 1` right
//! away (the bus will not grant it until the sender, who requests last, has collected all
//! acknowledgements) and replies to the probe as soon as it arrives.
//!
//! A round is one turn per peer. After `rounds` rounds, every sender holds a [ledger::Ledger]
//! with one [ledger::ProbeEvent] per probe it sent, including the round-trip latency to each
//! responder.
//!
//! # Status
//!
//! `commonware-latency` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.
//!
//! # Stalls
//!
//! The protocol has no timeout: a sender waits for every acknowledgement and a responder waits
//! for the grant, so a single unresponsive peer wedges the whole test. Set
//! [Config::stall_timeout] to turn such a wedge into [Error::Stalled].

#![doc(
    html_logo_url = "https://commonware.xyz/imgs/rustdoc_logo.svg",
    html_favicon_url = "https://commonware.xyz/favicon.ico"
)]

use std::{error::Error as StdError, time::Duration};
use thiserror::Error;

pub mod bus;
mod engine;
pub use engine::Engine;
mod gateway;
pub mod ledger;
mod metrics;
pub mod report;
mod responder;
pub mod roster;
pub mod scenario;
pub mod scheduler;
mod sender;
pub mod wire;

/// Logical time of the bus.
pub type Time = u64;

/// Synchronization point achieved by every peer before the first round.
pub const START_POINT: &str = "start";

/// Synchronization point achieved by every peer after the last round.
pub const FINISH_POINT: &str = "finish";

/// Errors that can occur while running the latency test.
#[derive(Debug, Error)]
pub enum Error {
    #[error("response for unknown serial: {0}")]
    UnknownSerial(u32),
    #[error("serial already sent: {0}")]
    DuplicateSerial(u32),
    #[error("duplicate response for serial {serial} from {responder}")]
    DuplicateResponse { serial: u32, responder: String },
    #[error("unexpected response for serial {serial} from {responder} (expected {expected})")]
    UnexpectedResponse {
        serial: u32,
        responder: String,
        expected: u32,
    },
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] commonware_codec::Error),
    #[error("transport failed: {0}")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),
    #[error("stalled at time {time} waiting for {waiting}")]
    Stalled { time: Time, waiting: &'static str },
    #[error("runtime error: {0}")]
    Runtime(#[from] commonware_runtime::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns true if the error is a protocol violation that does not end the run.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::UnknownSerial(_)
                | Error::DuplicateSerial(_)
                | Error::DuplicateResponse { .. }
                | Error::UnexpectedResponse { .. }
                | Error::InvalidMessage(_)
        )
    }
}

/// Configuration for the [Engine].
#[derive(Clone, Debug)]
pub struct Config {
    /// Name of this peer (not empty, at most [wire::MAX_NAME_LEN] bytes).
    pub name: String,

    /// Names of the other peers this peer was configured to test against.
    ///
    /// The turn order is derived from the peers actually known to the bus, this list only
    /// serves to detect disagreement between the two.
    pub peers: Vec<String>,

    /// Size (in bytes) of the payload carried by every probe and acknowledgement.
    pub payload_size: usize,

    /// Number of rounds to run (each round is one turn per peer).
    pub rounds: u32,

    /// Maximum time to wait for acknowledgements, a grant, or a synchronization point
    /// before giving up.
    ///
    /// If `None`, waits forever.
    pub stall_timeout: Option<Duration>,
}
