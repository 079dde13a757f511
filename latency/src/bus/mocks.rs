//! A [Bus] that replays a fixed script of events and records everything asked of it.

use super::{Bus, Event};
use crate::{wire::Message, Time};
use bytes::Bytes;
use commonware_codec::Decode;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("published invalid message")]
    InvalidMessage,
    #[error("bus closed")]
    Closed,
}

/// A call made on [Scripted].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Publish(Message),
    RequestAdvance(Time),
    Achieve(String),
    Next,
}

/// Yields the scripted events in order, then never yields again.
pub struct Scripted {
    events: VecDeque<Event>,
    actions: Arc<Mutex<Vec<Action>>>,
    fail_publish: bool,
    fail_advance: bool,
}

impl Scripted {
    pub fn new(events: impl IntoIterator<Item = Event>) -> Self {
        Self {
            events: events.into_iter().collect(),
            actions: Arc::new(Mutex::new(Vec::new())),
            fail_publish: false,
            fail_advance: false,
        }
    }

    /// Fail every [Bus::publish] with [Error::Closed] (without recording it).
    pub fn fail_publish(mut self) -> Self {
        self.fail_publish = true;
        self
    }

    /// Fail every [Bus::request_advance] with [Error::Closed] (without recording it).
    pub fn fail_advance(mut self) -> Self {
        self.fail_advance = true;
        self
    }

    /// Returns the log of actions taken on this bus.
    pub fn actions(&self) -> Arc<Mutex<Vec<Action>>> {
        self.actions.clone()
    }

    fn record(&self, action: Action) {
        self.actions.lock().unwrap().push(action);
    }
}

impl Bus for Scripted {
    type Error = Error;

    async fn publish(&mut self, message: Bytes) -> Result<(), Error> {
        if self.fail_publish {
            return Err(Error::Closed);
        }
        let message =
            Message::decode_cfg(message, &usize::MAX).map_err(|_| Error::InvalidMessage)?;
        self.record(Action::Publish(message));
        Ok(())
    }

    async fn request_advance(&mut self, time: Time) -> Result<(), Error> {
        if self.fail_advance {
            return Err(Error::Closed);
        }
        self.record(Action::RequestAdvance(time));
        Ok(())
    }

    async fn achieve(&mut self, point: &str) -> Result<(), Error> {
        self.record(Action::Achieve(point.to_string()));
        Ok(())
    }

    async fn next(&mut self) -> Result<Event, Error> {
        self.record(Action::Next);
        match self.events.pop_front() {
            Some(event) => Ok(event),
            None => futures::future::pending().await,
        }
    }
}
