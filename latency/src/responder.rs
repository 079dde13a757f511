//! Acknowledge the probe of the peer whose turn it is.
//!
//! The responder requests the next logical time before it has even seen the probe. The bus
//! only grants the advance once the sender (who requests last) has collected every
//! acknowledgement, so waiting for the grant doubles as waiting for the turn to end.

use crate::{bus::Bus, gateway::Gateway, scheduler::Turn, wire::Message, Error};
use bytes::Bytes;
use commonware_runtime::Clock;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Serial of the probe this peer must acknowledge (if any).
///
/// The slot is filled by the pump and consumed by the responder loop. It holds at most one
/// serial: within a turn only one peer sends a probe.
#[derive(Clone, Debug, Default)]
pub(crate) struct Pending(Arc<Mutex<Option<u32>>>);

impl Pending {
    /// Fill the slot with `serial`.
    ///
    /// If the slot is already filled, it is left untouched and the outstanding serial is
    /// returned as the error.
    pub fn set(&self, serial: u32) -> Result<(), u32> {
        let mut slot = self.0.lock().unwrap();
        if let Some(outstanding) = *slot {
            return Err(outstanding);
        }
        *slot = Some(serial);
        Ok(())
    }

    /// Empty the slot, returning the serial it held.
    pub fn take(&self) -> Option<u32> {
        self.0.lock().unwrap().take()
    }
}

/// Request the next logical time and acknowledge any probe received until it is granted.
pub(crate) async fn wait_and_respond<E: Clock, B: Bus>(
    gateway: &mut Gateway<E, B>,
    turn: &Turn,
    payload: &Bytes,
) -> Result<(), Error> {
    let requested = gateway.request_advance().await?;
    let deadline = gateway.deadline();
    loop {
        if let Some(serial) = gateway.pending().take() {
            if serial != turn.serial {
                debug!(serial, expected = turn.serial, "acknowledging probe from another turn");
            }
            let ack = Message::Ack {
                serial,
                sender: gateway.me().to_string(),
                payload: payload.clone(),
            };
            gateway.publish(&ack).await?;
            gateway.metrics().acks_sent.inc();
            debug!(serial, sender = %turn.sender, "sent acknowledgement");
        }
        if gateway.current_time() >= requested {
            return Ok(());
        }
        gateway.pump(deadline, "grant").await?;
    }
}
