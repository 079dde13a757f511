//! Interface to the publish/subscribe bus that carries messages and owns the logical clock.
//!
//! The latency test never advances time itself. It asks the bus to advance with
//! [Bus::request_advance] and learns about the new time when [Bus::next] yields
//! [Event::Granted]. Implementations must only grant an advance once every participant has
//! requested it, which is what holds responders back until the sender has collected all of
//! its acknowledgements.

use crate::Time;
use bytes::Bytes;
use std::{error::Error as StdError, fmt::Debug, future::Future};

#[cfg(test)]
pub mod mocks;
pub mod simulated;

/// An event delivered by the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// An encoded [crate::wire::Message] published by another peer.
    Message(Bytes),

    /// The logical clock advanced to the given time.
    Granted(Time),

    /// Every peer achieved the named synchronization point.
    Synchronized(String),
}

/// Interface to the bus used by the latency test.
pub trait Bus: Send + 'static {
    /// Error that can occur when interacting with the bus.
    type Error: Debug + StdError + Send + Sync + 'static;

    /// Publish a message to every other peer.
    fn publish(&mut self, message: Bytes) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Request that the logical clock be advanced to `time`.
    ///
    /// Returning does not imply the clock moved: the advance is reported later by
    /// [Event::Granted].
    fn request_advance(&mut self, time: Time)
        -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Mark the synchronization point `point` as achieved by this peer.
    ///
    /// Once every peer achieved it, [Event::Synchronized] is delivered.
    fn achieve(&mut self, point: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Wait for the next event.
    fn next(&mut self) -> impl Future<Output = Result<Event, Self::Error>> + Send;
}
