//! Turn order shared by every peer without negotiation.
//!
//! Each peer sorts its own name together with the names it learned from the registry. Because
//! names are unique and sorted by their natural ordering, every peer derives the same
//! name-to-index mapping and therefore agrees on whose turn it is at any logical time.

use crate::Time;
use std::{fmt, ops::Deref};

/// A sorted, deduplicated list of peer names.
///
/// A [Roster] always contains at least the peer that built it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Roster(Vec<String>);

impl Roster {
    /// Build the roster from our own name and the names of all known peers.
    ///
    /// The registration order of `known` has no effect on the result. A name that appears more
    /// than once (including our own) is kept once.
    pub fn build<I, S>(me: &str, known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = known.into_iter().map(Into::into).collect();
        names.push(me.to_string());
        names.sort();
        names.dedup();
        Self(names)
    }

    /// Returns the number of peers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false, a roster includes its builder.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the peer at `index`, if it exists.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    /// Returns the position of `name` in the turn order, if it is a participant.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0
            .binary_search_by(|candidate| candidate.as_str().cmp(name))
            .ok()
    }

    /// Returns the index of the peer whose turn it is at `time`.
    pub fn sender_index(&self, time: Time) -> usize {
        (time % self.0.len() as u64) as usize
    }

    /// Returns the peer whose turn it is at `time`.
    pub fn sender_at(&self, time: Time) -> &str {
        &self.0[self.sender_index(time)]
    }

    /// Returns the peer that originated the probe with `serial`.
    ///
    /// Serials are assigned as `(round - 1) * len + index + 1`, so the originator is recovered
    /// from `(serial - 1) mod len`. Serial `0` is never assigned and has no originator.
    pub fn originator(&self, serial: u32) -> Option<&str> {
        let offset = serial.checked_sub(1)?;
        self.get(offset as usize % self.0.len())
    }

    /// Returns an iterator over the names in turn order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Deref for Roster {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}
