//! Broadcast a probe and wait for every other peer to acknowledge it.
//!
//! The sender is the only peer that withholds its advance request during a turn. It asks for
//! the next logical time only after the [crate::ledger::Ledger] reports every acknowledgement,
//! which releases the responders that requested the same time earlier.

use crate::{bus::Bus, gateway::Gateway, scheduler::Turn, wire::Message, Error};
use bytes::Bytes;
use commonware_runtime::Clock;
use tracing::debug;

/// Send the probe for `turn`, collect every acknowledgement, and advance the clock.
pub(crate) async fn send_and_wait<E: Clock, B: Bus>(
    gateway: &mut Gateway<E, B>,
    turn: &Turn,
    payload: &Bytes,
) -> Result<(), Error> {
    let expected = (gateway.roster().len() - 1) as u32;
    let probe = Message::Probe {
        serial: turn.serial,
        sender: gateway.me().to_string(),
        payload: payload.clone(),
    };

    // Record before publishing, acknowledgements may arrive as soon as the probe is out
    let event = gateway
        .ledger()
        .record_sent(turn.serial, gateway.now(), expected, payload.len())?;
    gateway.publish(&probe).await?;
    gateway.metrics().probes_sent.inc();
    debug!(serial = turn.serial, expected, "sent probe");

    // Wait for every acknowledgement
    let deadline = gateway.deadline();
    while !event.is_complete() {
        gateway.pump(deadline, "acknowledgements").await?;
    }
    debug!(serial = turn.serial, "collected acknowledgements");

    // Step forward, releasing everyone else
    let requested = gateway.request_advance().await?;
    let deadline = gateway.deadline();
    gateway.wait_for_grant(requested, deadline).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::{
            mocks::{Action, Scripted},
            Event,
        },
        ledger::Ledger,
        metrics::Metrics,
        roster::Roster,
        scheduler::{Role, Scheduler},
    };
    use commonware_codec::Encode;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};
    use std::time::Duration;

    fn gateway<E: Clock>(
        context: E,
        bus: Scripted,
        ledger: Ledger,
        time: u64,
    ) -> Gateway<E, Scripted> {
        let roster = Roster::build("beta", ["alpha", "gamma"]);
        let mut gateway = Gateway::new(
            context,
            bus,
            "beta".into(),
            roster,
            ledger,
            64,
            Some(Duration::from_secs(10)),
            Metrics::default(),
        );
        gateway.set_time(time);
        gateway
    }

    /// Beta's turn in the second round (serial 5).
    fn second_round_turn() -> Turn {
        let mut scheduler = Scheduler::new("beta", Roster::build("beta", ["alpha", "gamma"]));
        let mut time = 0;
        for round in 1..=2 {
            scheduler.begin(round);
            loop {
                let turn = scheduler.start_turn(time);
                if round == 2 && turn.role == Role::Send {
                    return turn;
                }
                time += 1;
                if scheduler.end_turn(time) {
                    break;
                }
            }
        }
        unreachable!("beta never sends");
    }

    fn ack(serial: u32, sender: &str) -> Event {
        Event::Message(
            Message::Ack {
                serial,
                sender: sender.into(),
                payload: Bytes::new(),
            }
            .encode()
            .freeze(),
        )
    }

    #[test_traced]
    fn test_waits_for_every_acknowledgement() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let turn = second_round_turn();
            assert_eq!(turn.serial, 5);
            assert_eq!(turn.time, 4);

            let bus = Scripted::new([ack(5, "alpha"), ack(5, "gamma"), Event::Granted(5)]);
            let actions = bus.actions();
            let ledger = Ledger::new();
            let mut gateway = gateway(context, bus, ledger.clone(), turn.time);
            let payload = Bytes::from_static(b"payload");

            send_and_wait(&mut gateway, &turn, &payload).await.unwrap();
            assert!(ledger.is_complete(5));
            assert_eq!(gateway.current_time(), 5);

            // The advance is requested only once the second acknowledgement is in
            let probe = Message::Probe {
                serial: 5,
                sender: "beta".into(),
                payload: payload.clone(),
            };
            assert_eq!(
                actions.lock().unwrap().as_slice(),
                &[
                    Action::Publish(probe),
                    Action::Next,
                    Action::Next,
                    Action::RequestAdvance(5),
                    Action::Next,
                ]
            );

            let event = ledger.get(5).unwrap();
            assert_eq!(event.expected(), 2);
            assert_eq!(event.payload_size(), payload.len());
            assert_eq!(gateway.metrics().probes_sent.get(), 1);
            assert_eq!(gateway.metrics().acks_received.get(), 2);
        });
    }

    #[test_traced]
    fn test_ignores_unrelated_acknowledgements() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let turn = second_round_turn();
            let bus = Scripted::new([
                ack(5, "alpha"),
                ack(8, "gamma"),
                ack(5, "alpha"),
                ack(5, "gamma"),
                Event::Granted(5),
            ]);
            let ledger = Ledger::new();
            let mut gateway = gateway(context, bus, ledger.clone(), turn.time);

            send_and_wait(&mut gateway, &turn, &Bytes::new())
                .await
                .unwrap();
            let event = ledger.get(5).unwrap();
            assert_eq!(event.received(), 2);
            assert!(ledger.get(8).is_none());
            // Serial 8 is ours but was never sent, alpha answered twice
            assert_eq!(gateway.metrics().anomalies.get(), 2);
        });
    }

    #[test_traced]
    fn test_never_completes_with_missing_peer() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let turn = second_round_turn();
            let bus = Scripted::new([ack(5, "alpha")]);
            let actions = bus.actions();
            let ledger = Ledger::new();
            let mut gateway = gateway(context, bus, ledger.clone(), turn.time);

            let result = send_and_wait(&mut gateway, &turn, &Bytes::new()).await;
            assert!(matches!(
                result,
                Err(Error::Stalled {
                    time: 4,
                    waiting: "acknowledgements"
                })
            ));
            assert!(!ledger.is_complete(5));
            assert!(!actions
                .lock()
                .unwrap()
                .iter()
                .any(|action| matches!(action, Action::RequestAdvance(_))));
        });
    }

    #[test_traced]
    fn test_publish_failure() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let turn = second_round_turn();
            let bus = Scripted::new([ack(5, "alpha"), ack(5, "gamma"), Event::Granted(5)])
                .fail_publish();
            let actions = bus.actions();
            let ledger = Ledger::new();
            let mut gateway = gateway(context, bus, ledger.clone(), turn.time);

            let result = send_and_wait(&mut gateway, &turn, &Bytes::new()).await;
            assert!(matches!(result, Err(Error::Transport(_))));
            assert_eq!(gateway.current_time(), 4);
            assert_eq!(gateway.metrics().probes_sent.get(), 0);

            // Nothing was pumped and the clock was left alone
            assert!(actions.lock().unwrap().is_empty());
            assert_eq!(ledger.get(5).unwrap().received(), 0);
        });
    }
}
