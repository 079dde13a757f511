//! Record probes and the acknowledgements collected for them.
//!
//! The [Ledger] is shared between the task that waits for a probe to complete and any context
//! that delivers acknowledgements (or reads the results afterwards). Every [ProbeEvent] tracks
//! its progress with an atomic counter that only ever increases.

use crate::Error;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime},
};

/// An acknowledgement recorded for a [ProbeEvent].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Peer that sent the acknowledgement.
    pub responder: String,

    /// Time between sending the probe and receiving the acknowledgement.
    pub latency: Duration,
}

/// Progress of a [ProbeEvent] after recording a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub received: u32,
    pub expected: u32,
}

impl Progress {
    /// Returns true if every expected response has been received.
    pub fn is_complete(&self) -> bool {
        self.received == self.expected
    }
}

/// A probe sent by this peer.
#[derive(Debug)]
pub struct ProbeEvent {
    serial: u32,
    sent_at: SystemTime,
    expected: u32,
    payload_size: usize,

    received: AtomicU32,
    responses: Mutex<Vec<Response>>,
}

impl ProbeEvent {
    fn new(serial: u32, sent_at: SystemTime, expected: u32, payload_size: usize) -> Self {
        Self {
            serial,
            sent_at,
            expected,
            payload_size,
            received: AtomicU32::new(0),
            responses: Mutex::new(Vec::with_capacity(expected as usize)),
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn sent_at(&self) -> SystemTime {
        self.sent_at
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Returns the number of responses received so far.
    pub fn received(&self) -> u32 {
        self.received.load(Ordering::Acquire)
    }

    /// Returns true if every expected response has been received.
    pub fn is_complete(&self) -> bool {
        self.received() == self.expected
    }

    /// Returns a snapshot of the responses received so far, in arrival order.
    pub fn responses(&self) -> Vec<Response> {
        self.responses.lock().unwrap().clone()
    }

    fn record(&self, responder: &str, received_at: SystemTime) -> Result<Progress, Error> {
        // Duplicate and excess checks must happen under the same lock as the insert
        let mut responses = self.responses.lock().unwrap();
        if responses.iter().any(|r| r.responder == responder) {
            return Err(Error::DuplicateResponse {
                serial: self.serial,
                responder: responder.to_string(),
            });
        }
        if responses.len() as u32 >= self.expected {
            return Err(Error::UnexpectedResponse {
                serial: self.serial,
                responder: responder.to_string(),
                expected: self.expected,
            });
        }

        // Clocks that are not monotonic may report a receipt before the send
        let latency = received_at
            .duration_since(self.sent_at)
            .unwrap_or(Duration::ZERO);
        responses.push(Response {
            responder: responder.to_string(),
            latency,
        });
        let received = self.received.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(Progress {
            received,
            expected: self.expected,
        })
    }
}

/// All probes sent by this peer, keyed by serial.
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    events: Arc<Mutex<BTreeMap<u32, Arc<ProbeEvent>>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a probe that is about to be sent, expecting `expected` responses.
    ///
    /// A probe is recorded exactly once, so a serial that already exists is rejected.
    pub fn record_sent(
        &self,
        serial: u32,
        sent_at: SystemTime,
        expected: u32,
        payload_size: usize,
    ) -> Result<Arc<ProbeEvent>, Error> {
        let mut events = self.events.lock().unwrap();
        if events.contains_key(&serial) {
            return Err(Error::DuplicateSerial(serial));
        }
        let event = Arc::new(ProbeEvent::new(serial, sent_at, expected, payload_size));
        events.insert(serial, event.clone());
        Ok(event)
    }

    /// Record a response to the probe with `serial`.
    ///
    /// A response for a probe this ledger never recorded is a protocol violation and leaves
    /// every recorded probe untouched.
    pub fn record_response(
        &self,
        serial: u32,
        responder: &str,
        received_at: SystemTime,
    ) -> Result<Progress, Error> {
        let event = self.get(serial).ok_or(Error::UnknownSerial(serial))?;
        event.record(responder, received_at)
    }

    /// Returns true if the probe with `serial` has received every expected response.
    ///
    /// Unknown serials are never complete.
    pub fn is_complete(&self, serial: u32) -> bool {
        self.get(serial).is_some_and(|event| event.is_complete())
    }

    /// Returns the probe with `serial`, if it was recorded.
    pub fn get(&self, serial: u32) -> Option<Arc<ProbeEvent>> {
        self.events.lock().unwrap().get(&serial).cloned()
    }

    /// Returns every recorded probe in serial order.
    pub fn events(&self) -> Vec<Arc<ProbeEvent>> {
        self.events.lock().unwrap().values().cloned().collect()
    }

    /// Returns the number of recorded probes.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Returns true if no probe was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
