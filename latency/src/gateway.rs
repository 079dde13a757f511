//! A peer's view of the bus: cached logical time and the inbound event pump.
//!
//! [Gateway::pump] waits for exactly one event from the bus and applies it:
//!
//! - a grant moves [Gateway::current_time] forward,
//! - a probe from another peer fills the [Pending] slot,
//! - an acknowledgement of one of our probes is recorded in the [Ledger],
//! - a synchronization notice marks the point as reached.
//!
//! Protocol violations found while applying an event are logged and counted, they never end
//! the run. Failures of the bus itself are returned.

use crate::{
    bus::{Bus, Event},
    ledger::Ledger,
    metrics::Metrics,
    responder::Pending,
    roster::Roster,
    wire::Message,
    Error, Time,
};
use bytes::Bytes;
use commonware_codec::{Decode, Encode};
use commonware_macros::select;
use commonware_runtime::Clock;
use std::{
    collections::HashSet,
    error::Error as StdError,
    time::{Duration, SystemTime},
};
use tracing::{debug, trace, warn};

/// Wrap a failure of the bus.
pub(crate) fn transport<E: StdError + Send + Sync + 'static>(err: E) -> Error {
    Error::Transport(Box::new(err))
}

pub(crate) struct Gateway<E: Clock, B: Bus> {
    context: E,
    bus: B,

    me: String,
    roster: Roster,
    ledger: Ledger,
    pending: Pending,
    max_payload: usize,
    stall_timeout: Option<Duration>,

    time: Time,
    reached: HashSet<String>,

    metrics: Metrics,
}

impl<E: Clock, B: Bus> Gateway<E, B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: E,
        bus: B,
        me: String,
        roster: Roster,
        ledger: Ledger,
        max_payload: usize,
        stall_timeout: Option<Duration>,
        metrics: Metrics,
    ) -> Self {
        Self {
            context,
            bus,
            me,
            roster,
            ledger,
            pending: Pending::default(),
            max_payload,
            stall_timeout,
            time: 0,
            reached: HashSet::new(),
            metrics,
        }
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn pending(&self) -> &Pending {
        &self.pending
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Returns the last logical time granted by the bus.
    pub fn current_time(&self) -> Time {
        self.time
    }

    #[cfg(test)]
    pub fn set_time(&mut self, time: Time) {
        self.time = time;
    }

    /// Returns the current wall-clock time.
    pub fn now(&self) -> SystemTime {
        self.context.current()
    }

    /// Returns the deadline for a wait that starts now, if a stall timeout is configured.
    pub fn deadline(&self) -> Option<SystemTime> {
        self.stall_timeout.map(|timeout| self.now() + timeout)
    }

    /// Encode and publish `message`.
    pub async fn publish(&mut self, message: &Message) -> Result<(), Error> {
        self.bus
            .publish(message.encode().freeze())
            .await
            .map_err(transport)
    }

    /// Request an advance to the time after the current one, returning the requested time.
    pub async fn request_advance(&mut self) -> Result<Time, Error> {
        let requested = self.time + 1;
        self.bus
            .request_advance(requested)
            .await
            .map_err(transport)?;
        trace!(requested, "requested advance");
        Ok(requested)
    }

    /// Pump until the clock reaches `requested`.
    pub async fn wait_for_grant(
        &mut self,
        requested: Time,
        deadline: Option<SystemTime>,
    ) -> Result<(), Error> {
        while self.time < requested {
            self.pump(deadline, "grant").await?;
        }
        Ok(())
    }

    /// Achieve `point` and pump until every peer has achieved it.
    pub async fn synchronize(&mut self, point: &str) -> Result<(), Error> {
        self.bus.achieve(point).await.map_err(transport)?;
        debug!(point, "achieved synchronization point");
        let deadline = self.deadline();
        while !self.reached.contains(point) {
            self.pump(deadline, "synchronization").await?;
        }
        debug!(point, "synchronized");
        Ok(())
    }

    /// Wait for the next event from the bus and apply it.
    ///
    /// If `deadline` passes first, returns [Error::Stalled] describing what we were `waiting`
    /// for.
    pub async fn pump(
        &mut self,
        deadline: Option<SystemTime>,
        waiting: &'static str,
    ) -> Result<(), Error> {
        let event = match deadline {
            Some(deadline) => {
                let event;
                select! {
                    _ = self.context.sleep_until(deadline) => {
                        return Err(Error::Stalled { time: self.time, waiting });
                    },
                    result = self.bus.next() => {
                        event = result;
                    },
                }
                event
            }
            None => self.bus.next().await,
        };
        match event.map_err(transport)? {
            Event::Granted(time) => self.granted(time),
            Event::Synchronized(point) => {
                trace!(%point, "synchronization point reached");
                self.reached.insert(point);
            }
            Event::Message(message) => self.deliver(message),
        }
        Ok(())
    }

    fn granted(&mut self, time: Time) {
        if time <= self.time {
            warn!(time, current = self.time, "ignoring stale grant");
            self.metrics.anomalies.inc();
            return;
        }
        trace!(time, "granted");
        self.time = time;
        self.metrics.logical_time.set(time as i64);
    }

    fn deliver(&mut self, message: Bytes) {
        let message = match Message::decode_cfg(message, &self.max_payload) {
            Ok(message) => message,
            Err(err) => {
                self.violation(err.into());
                return;
            }
        };
        match message {
            Message::Probe { serial, sender, .. } => {
                let originator = self.roster.originator(serial);
                if originator != Some(sender.as_str()) {
                    warn!(serial, %sender, ?originator, "probe from unexpected sender");
                    self.metrics.anomalies.inc();
                }
                match self.pending.set(serial) {
                    Ok(()) => trace!(serial, %sender, "probe pending"),
                    Err(outstanding) => {
                        warn!(serial, outstanding, "dropping probe while response pending");
                        self.metrics.anomalies.inc();
                    }
                }
            }
            Message::Ack { serial, sender, .. } => {
                // Every peer hears every acknowledgement, only the originator records them
                if self.roster.originator(serial) != Some(self.me.as_str()) {
                    trace!(serial, %sender, "ignoring acknowledgement for another peer");
                    return;
                }
                match self
                    .ledger
                    .record_response(serial, &sender, self.context.current())
                {
                    Ok(progress) => {
                        self.metrics.acks_received.inc();
                        debug!(
                            serial,
                            responder = %sender,
                            received = progress.received,
                            expected = progress.expected,
                            "received acknowledgement"
                        );
                    }
                    Err(err) => self.violation(err),
                }
            }
        }
    }

    fn violation(&self, err: Error) {
        warn!(?err, "protocol violation");
        self.metrics.anomalies.inc();
    }
}
