//! Decide whose turn it is and when a round is over.
//!
//! At logical time `t` the sender is `roster[t mod peers]`. Every turn ends with the clock
//! advancing by one, so a round is over once `t mod peers == 0` again. Because the first turn of
//! a round also satisfies that condition, the check happens after each turn, never before.

use crate::{roster::Roster, Time};

/// Returns the serial of the probe sent by `sender_index` in `round`.
///
/// Rounds start at `1`. Serials start at `1` and increase by one with every turn of the test.
/// Returns `None` if `round` is `0` or the serial does not fit in a `u32`.
pub fn serial(round: u32, peers: usize, sender_index: usize) -> Option<u32> {
    let peers = u32::try_from(peers).ok()?;
    let sender_index = u32::try_from(sender_index).ok()?;
    round
        .checked_sub(1)?
        .checked_mul(peers)?
        .checked_add(sender_index)?
        .checked_add(1)
}

/// Returns true if every serial of a test with `rounds` rounds over `peers` peers fits in a `u32`.
pub fn serials_fit(rounds: u32, peers: usize) -> bool {
    rounds == 0 || peers == 0 || serial(rounds, peers, peers - 1).is_some()
}

/// What this peer does during a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Broadcast a probe and wait for every acknowledgement.
    Send,

    /// Acknowledge the probe of the sender.
    Respond,
}

/// A single turn of a round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub round: u32,
    pub time: Time,
    pub sender_index: usize,
    pub sender: String,
    pub serial: u32,
    pub role: Role,
}

/// State of the [Scheduler].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum State {
    AwaitingTurn,
    Sending(Turn),
    Responding(Turn),
    RoundComplete,
}

/// Drives the turns of each round for a single peer.
pub struct Scheduler {
    me: String,
    roster: Roster,
    round: u32,
    state: State,
}

impl Scheduler {
    pub fn new(me: &str, roster: Roster) -> Self {
        Self {
            me: me.to_string(),
            roster,
            round: 0,
            state: State::RoundComplete,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    fn turn(&self, time: Time) -> Turn {
        let sender_index = self.roster.sender_index(time);
        let sender = self.roster.sender_at(time).to_string();
        let role = if sender == self.me {
            Role::Send
        } else {
            Role::Respond
        };
        Turn {
            round: self.round,
            time,
            sender_index,
            serial: serial(self.round, self.roster.len(), sender_index)
                .expect("serials checked when the round began"),
            sender,
            role,
        }
    }

    /// Begin `round` (starting at `1`).
    ///
    /// # Panics
    ///
    /// Panics if the previous round is not complete, if rounds are not consecutive, or if the
    /// serials of `round` do not fit in a `u32` (see [serials_fit]).
    pub fn begin(&mut self, round: u32) {
        assert_eq!(self.state, State::RoundComplete, "round in progress");
        assert_eq!(round, self.round + 1, "rounds must be consecutive");
        assert!(
            serials_fit(round, self.roster.len()),
            "serials of round {round} overflow"
        );
        self.round = round;
        self.state = State::AwaitingTurn;
    }

    /// Start the turn at `time`.
    ///
    /// # Panics
    ///
    /// Panics if a turn is already in progress or the round is complete.
    pub fn start_turn(&mut self, time: Time) -> Turn {
        assert_eq!(self.state, State::AwaitingTurn, "not awaiting a turn");
        let turn = self.turn(time);
        self.state = match turn.role {
            Role::Send => State::Sending(turn.clone()),
            Role::Respond => State::Responding(turn.clone()),
        };
        turn
    }

    /// End the current turn now that the clock reads `time`.
    ///
    /// Returns true if the round is complete.
    ///
    /// # Panics
    ///
    /// Panics if no turn is in progress.
    pub fn end_turn(&mut self, time: Time) -> bool {
        assert!(
            matches!(self.state, State::Sending(_) | State::Responding(_)),
            "no turn in progress"
        );
        if time % self.roster.len() as u64 == 0 {
            self.state = State::RoundComplete;
            return true;
        }
        self.state = State::AwaitingTurn;
        false
    }
}
