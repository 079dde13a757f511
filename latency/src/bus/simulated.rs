//! In-process bus with a global logical clock and configurable link latency.
//!
//! A single actor owns all state. Published messages are fanned out to every other registered
//! peer, either immediately or (when a [Link] was configured for the pair) after a delay sampled
//! from a normal distribution. Note: delayed messages can be delivered out of order.
//!
//! The logical clock only moves once every registered peer has an outstanding
//! [Bus::request_advance]. The clock then jumps to the smallest requested time and every peer
//! whose request was satisfied receives [Event::Granted].

use super::{Bus, Event};
use crate::Time;
use bytes::Bytes;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use futures::{
    channel::{mpsc, oneshot},
    StreamExt,
};
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors that can occur when interacting with the simulated bus.
#[derive(Debug, Error)]
pub enum Error {
    #[error("network closed")]
    NetworkClosed,
    #[error("message too large: {0}")]
    MessageTooLarge(usize),
    #[error("peer already registered: {0}")]
    AlreadyRegistered(String),
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    #[error("not valid to link self")]
    LinkingSelf,
    #[error("invalid link (mean={0}, stddev={1})")]
    InvalidLink(f64, f64),
    #[error("invalid advance to {requested} (current time {current})")]
    InvalidAdvance { requested: Time, current: Time },
}

/// Describes the latency of messages sent from one peer to another.
///
/// Links are unidirectional (and must be set up in both directions
/// for a symmetric connection).
#[derive(Clone, Copy, Debug)]
pub struct Link {
    /// Mean latency for the delivery of a message in milliseconds.
    pub latency_mean: f64,

    /// Standard deviation of the latency for the delivery of a message in milliseconds.
    pub latency_stddev: f64,
}

/// Configuration for the simulated bus.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum size of a published message (in bytes).
    pub max_message_size: usize,
}

enum Task {
    Publish {
        origin: String,
        message: Bytes,
        response: oneshot::Sender<Result<usize, Error>>,
    },
    RequestAdvance {
        origin: String,
        time: Time,
        response: oneshot::Sender<Result<(), Error>>,
    },
    Achieve {
        origin: String,
        point: String,
        response: oneshot::Sender<Result<(), Error>>,
    },
}

/// Implementation of a simulated bus.
pub struct Network<E: Spawner + Clock + Rng + Metrics> {
    context: E,
    max_message_size: usize,

    sender: mpsc::UnboundedSender<Task>,
    receiver: mpsc::UnboundedReceiver<Task>,

    peers: BTreeMap<String, mpsc::UnboundedSender<Event>>,
    links: HashMap<(String, String), Normal<f64>>,

    time: Time,
    requests: BTreeMap<String, Time>,
    points: HashMap<String, BTreeSet<String>>,

    messages_sent: Counter,
    messages_delivered: Counter,
    grants: Counter,
    logical_time: Gauge,
}

impl<E: Spawner + Clock + Rng + Metrics> Network<E> {
    /// Create a new simulated bus.
    pub fn new(context: E, cfg: Config) -> Self {
        let (sender, receiver) = mpsc::unbounded();

        let messages_sent = Counter::default();
        let messages_delivered = Counter::default();
        let grants = Counter::default();
        let logical_time = Gauge::default();
        context.register(
            "messages_sent",
            "messages accepted for delivery",
            messages_sent.clone(),
        );
        context.register(
            "messages_delivered",
            "messages delivered to peers",
            messages_delivered.clone(),
        );
        context.register("grants", "time advances granted", grants.clone());
        context.register("logical_time", "current logical time", logical_time.clone());

        Self {
            context,
            max_message_size: cfg.max_message_size,
            sender,
            receiver,
            peers: BTreeMap::new(),
            links: HashMap::new(),
            time: 0,
            requests: BTreeMap::new(),
            points: HashMap::new(),
            messages_sent,
            messages_delivered,
            grants,
            logical_time,
        }
    }

    /// Register a new peer with the bus.
    ///
    /// Every registered peer takes part in time advances and synchronization points, so all
    /// peers must be registered before the bus is started.
    pub fn register(&mut self, name: &str) -> Result<Endpoint, Error> {
        if self.peers.contains_key(name) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }
        let (sender, receiver) = mpsc::unbounded();
        self.peers.insert(name.to_string(), sender);
        Ok(Endpoint {
            me: name.to_string(),
            max_message_size: self.max_message_size,
            sender: self.sender.clone(),
            receiver,
        })
    }

    /// Returns the names of all registered peers.
    pub fn peers(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    /// Configure the latency of messages from `sender` to `receiver`.
    ///
    /// Link can be called multiple times for the same sender/receiver. The latest
    /// setting will be used. Pairs without a link deliver immediately.
    pub fn link(&mut self, sender: &str, receiver: &str, link: Link) -> Result<(), Error> {
        if sender == receiver {
            return Err(Error::LinkingSelf);
        }
        for peer in [sender, receiver] {
            if !self.peers.contains_key(peer) {
                return Err(Error::UnknownPeer(peer.to_string()));
            }
        }
        let distribution = Normal::new(link.latency_mean, link.latency_stddev)
            .map_err(|_| Error::InvalidLink(link.latency_mean, link.latency_stddev))?;
        self.links
            .insert((sender.to_string(), receiver.to_string()), distribution);
        Ok(())
    }

    /// Start the bus.
    pub fn start(self) -> Handle<()> {
        self.context.clone().spawn(|_| self.run())
    }

    async fn run(mut self) {
        while let Some(task) = self.receiver.next().await {
            match task {
                Task::Publish {
                    origin,
                    message,
                    response,
                } => {
                    let result = self.publish(&origin, message);
                    let _ = response.send(result);
                }
                Task::RequestAdvance {
                    origin,
                    time,
                    response,
                } => {
                    let result = self.request_advance(origin, time);
                    let accepted = result.is_ok();
                    let _ = response.send(result);
                    if accepted {
                        self.grant();
                    }
                }
                Task::Achieve {
                    origin,
                    point,
                    response,
                } => {
                    let result = self.achieve(origin, point);
                    let _ = response.send(result);
                }
            }
        }
    }

    fn publish(&mut self, origin: &str, message: Bytes) -> Result<usize, Error> {
        if !self.peers.contains_key(origin) {
            return Err(Error::UnknownPeer(origin.to_string()));
        }
        if message.len() > self.max_message_size {
            return Err(Error::MessageTooLarge(message.len()));
        }

        let mut sent = 0;
        for (recipient, sender) in &self.peers {
            // Skip self
            if recipient == origin {
                continue;
            }
            self.messages_sent.inc();
            sent += 1;

            // Deliver immediately if there is no link
            let key = (origin.to_string(), recipient.clone());
            let Some(distribution) = self.links.get(&key) else {
                trace!(origin, recipient = recipient.as_str(), "delivering message");
                if sender.unbounded_send(Event::Message(message.clone())).is_ok() {
                    self.messages_delivered.inc();
                }
                continue;
            };

            // Apply link latency
            let delay = distribution.sample(&mut self.context).max(0.0);
            let delay = Duration::from_micros((delay * 1_000.0) as u64);
            trace!(origin, recipient = recipient.as_str(), ?delay, "delaying message");
            self.context.with_label("messenger").spawn({
                let sender = sender.clone();
                let message = message.clone();
                let messages_delivered = self.messages_delivered.clone();
                move |context| async move {
                    context.sleep(delay).await;
                    if sender.unbounded_send(Event::Message(message)).is_ok() {
                        messages_delivered.inc();
                    }
                }
            });
        }
        Ok(sent)
    }

    fn request_advance(&mut self, origin: String, time: Time) -> Result<(), Error> {
        if !self.peers.contains_key(&origin) {
            return Err(Error::UnknownPeer(origin));
        }
        if time <= self.time {
            return Err(Error::InvalidAdvance {
                requested: time,
                current: self.time,
            });
        }
        debug!(peer = %origin, time, "advance requested");
        if let Some(previous) = self.requests.insert(origin.clone(), time) {
            warn!(peer = %origin, previous, time, "replaced outstanding request");
        }
        Ok(())
    }

    /// Grant the smallest requested time once every peer has an outstanding request.
    fn grant(&mut self) {
        if self.requests.len() < self.peers.len() {
            return;
        }
        let Some(next) = self.requests.values().min().copied() else {
            return;
        };
        self.time = next;
        self.logical_time.set(next as i64);
        self.grants.inc();
        debug!(time = next, "granting advance");

        let satisfied: Vec<String> = self
            .requests
            .iter()
            .filter(|(_, requested)| **requested <= next)
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in satisfied {
            self.requests.remove(&peer);
            if let Some(sender) = self.peers.get(&peer) {
                let _ = sender.unbounded_send(Event::Granted(next));
            }
        }
    }

    fn achieve(&mut self, origin: String, point: String) -> Result<(), Error> {
        if !self.peers.contains_key(&origin) {
            return Err(Error::UnknownPeer(origin));
        }
        let achieved = self.points.entry(point.clone()).or_default();
        if !achieved.insert(origin.clone()) {
            debug!(peer = %origin, %point, "point already achieved");
            return Ok(());
        }
        debug!(peer = %origin, %point, achieved = achieved.len(), "point achieved");
        if achieved.len() < self.peers.len() {
            return Ok(());
        }

        // Release everyone
        self.points.remove(&point);
        for sender in self.peers.values() {
            let _ = sender.unbounded_send(Event::Synchronized(point.clone()));
        }
        Ok(())
    }
}

/// A peer's connection to the simulated bus.
pub struct Endpoint {
    me: String,
    max_message_size: usize,
    sender: mpsc::UnboundedSender<Task>,
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl Endpoint {
    /// Returns the name this endpoint was registered with.
    pub fn name(&self) -> &str {
        &self.me
    }

    async fn call<T>(
        &mut self,
        task: impl FnOnce(oneshot::Sender<Result<T, Error>>) -> Task,
    ) -> Result<T, Error> {
        let (response, receiver) = oneshot::channel();
        self.sender
            .unbounded_send(task(response))
            .map_err(|_| Error::NetworkClosed)?;
        receiver.await.map_err(|_| Error::NetworkClosed)?
    }
}

impl Bus for Endpoint {
    type Error = Error;

    async fn publish(&mut self, message: Bytes) -> Result<(), Error> {
        if message.len() > self.max_message_size {
            return Err(Error::MessageTooLarge(message.len()));
        }
        let origin = self.me.clone();
        self.call(|response| Task::Publish {
            origin,
            message,
            response,
        })
        .await
        .map(|_| ())
    }

    async fn request_advance(&mut self, time: Time) -> Result<(), Error> {
        let origin = self.me.clone();
        self.call(|response| Task::RequestAdvance {
            origin,
            time,
            response,
        })
        .await
    }

    async fn achieve(&mut self, point: &str) -> Result<(), Error> {
        let origin = self.me.clone();
        let point = point.to_string();
        self.call(|response| Task::Achieve {
            origin,
            point,
            response,
        })
        .await
    }

    async fn next(&mut self) -> Result<Event, Error> {
        self.receiver.next().await.ok_or(Error::NetworkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::{select, test_traced};
    use commonware_runtime::{deterministic, Runner};

    fn network<E: Spawner + Clock + Rng + Metrics>(context: E) -> Network<E> {
        Network::new(
            context,
            Config {
                max_message_size: 1024,
            },
        )
    }

    async fn assert_idle(context: &deterministic::Context, endpoint: &mut Endpoint) {
        select! {
            _ = context.sleep(Duration::from_millis(50)) => {},
            event = endpoint.next() => {
                panic!("unexpected event: {event:?}");
            },
        }
    }

    #[test_traced]
    fn test_grant_requires_every_peer() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut network = network(context.with_label("network"));
            let mut alpha = network.register("alpha").unwrap();
            let mut beta = network.register("beta").unwrap();
            network.start();

            // A single request is never granted
            alpha.request_advance(1).await.unwrap();
            assert_idle(&context, &mut alpha).await;

            // Once everyone requested, everyone is granted
            beta.request_advance(1).await.unwrap();
            assert_eq!(alpha.next().await.unwrap(), Event::Granted(1));
            assert_eq!(beta.next().await.unwrap(), Event::Granted(1));

            // Time cannot move backwards
            assert!(matches!(
                alpha.request_advance(1).await,
                Err(Error::InvalidAdvance {
                    requested: 1,
                    current: 1
                })
            ));
        });
    }

    #[test_traced]
    fn test_grant_smallest_request() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut network = network(context.with_label("network"));
            let mut alpha = network.register("alpha").unwrap();
            let mut beta = network.register("beta").unwrap();
            network.start();

            alpha.request_advance(5).await.unwrap();
            beta.request_advance(2).await.unwrap();
            assert_eq!(beta.next().await.unwrap(), Event::Granted(2));
            assert_idle(&context, &mut alpha).await;

            // Alpha stays outstanding until beta catches up
            beta.request_advance(5).await.unwrap();
            assert_eq!(alpha.next().await.unwrap(), Event::Granted(5));
            assert_eq!(beta.next().await.unwrap(), Event::Granted(5));
        });
    }

    #[test_traced]
    fn test_publish_skips_self() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut network = network(context.with_label("network"));
            let mut alpha = network.register("alpha").unwrap();
            let mut beta = network.register("beta").unwrap();
            let mut gamma = network.register("gamma").unwrap();
            network.start();

            let message = Bytes::from_static(b"probe");
            alpha.publish(message.clone()).await.unwrap();
            assert_eq!(beta.next().await.unwrap(), Event::Message(message.clone()));
            assert_eq!(gamma.next().await.unwrap(), Event::Message(message));
            assert_idle(&context, &mut alpha).await;
        });
    }

    #[test_traced]
    fn test_link_latency() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut network = network(context.with_label("network"));
            let mut alpha = network.register("alpha").unwrap();
            let mut beta = network.register("beta").unwrap();
            network
                .link(
                    "alpha",
                    "beta",
                    Link {
                        latency_mean: 20.0,
                        latency_stddev: 0.0,
                    },
                )
                .unwrap();
            network.start();

            let start = context.current();
            alpha.publish(Bytes::from_static(b"probe")).await.unwrap();
            assert!(matches!(beta.next().await.unwrap(), Event::Message(_)));
            let elapsed = context.current().duration_since(start).unwrap();
            assert!(elapsed >= Duration::from_millis(20));
        });
    }

    #[test_traced]
    fn test_synchronization_point() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut network = network(context.with_label("network"));
            let mut alpha = network.register("alpha").unwrap();
            let mut beta = network.register("beta").unwrap();
            network.start();

            alpha.achieve("start").await.unwrap();
            alpha.achieve("start").await.unwrap();
            assert_idle(&context, &mut alpha).await;

            beta.achieve("start").await.unwrap();
            let point = Event::Synchronized("start".into());
            assert_eq!(alpha.next().await.unwrap(), point);
            assert_eq!(beta.next().await.unwrap(), point);
        });
    }

    #[test_traced]
    fn test_invalid_configuration() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut network = network(context.with_label("network"));
            let mut alpha = network.register("alpha").unwrap();
            assert!(matches!(
                network.register("alpha"),
                Err(Error::AlreadyRegistered(_))
            ));
            let link = Link {
                latency_mean: 10.0,
                latency_stddev: 1.0,
            };
            assert!(matches!(
                network.link("alpha", "alpha", link),
                Err(Error::LinkingSelf)
            ));
            assert!(matches!(
                network.link("alpha", "beta", link),
                Err(Error::UnknownPeer(_))
            ));
            network.start();

            assert!(matches!(
                alpha.publish(Bytes::from(vec![0; 2048])).await,
                Err(Error::MessageTooLarge(2048))
            ));
        });
    }
}
