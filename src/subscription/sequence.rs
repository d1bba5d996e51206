use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// Location of a received event, as tracked by a subscription.
///
/// `position` is what gets checkpointed (a global or stream position, depending on the source).
/// `sequence` is the receipt order of the event within the current run of the subscription: the
/// first event received gets the sequence the run started at, every following event the next one.
/// Two positions are equal and ordered by their `sequence` only.
#[derive(Debug, Clone, Copy)]
pub struct CommitPosition {
    pub position: u64,
    pub sequence: u64,
    /// When the event was written to the store.
    pub timestamp: DateTime<Utc>,
}

impl CommitPosition {
    pub fn new(position: u64, sequence: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            position,
            sequence,
            timestamp,
        }
    }
}

impl PartialEq for CommitPosition {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for CommitPosition {}

impl PartialOrd for CommitPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CommitPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence.cmp(&other.sequence)
    }
}

/// Sorted set of the positions confirmed as processed and not checkpointed yet.
///
/// Handlers may complete out of order; a position can only be checkpointed once every position
/// received before it was confirmed as well.
#[derive(Debug, Default)]
pub struct CommitPositionSequence {
    positions: BTreeSet<CommitPosition>,
    next_sequence: u64,
}

impl CommitPositionSequence {
    /// Creates an empty sequence expecting `next_sequence` as the first position to be checkpointed.
    pub fn starting_at(next_sequence: u64) -> Self {
        Self {
            positions: BTreeSet::new(),
            next_sequence,
        }
    }

    /// Records a confirmed position. Positions already checkpointed are ignored.
    pub fn insert(&mut self, position: CommitPosition) -> bool {
        if position.sequence < self.next_sequence {
            return false;
        }
        self.positions.insert(position)
    }

    /// The greatest confirmed position such that every sequence from the smallest confirmed one up
    /// to it is confirmed too.
    pub fn first_before_gap(&self) -> Option<CommitPosition> {
        let mut positions = self.positions.iter();
        let mut last: CommitPosition = *positions.next()?;

        for position in positions {
            if position.sequence != last.sequence + 1 {
                break;
            }
            last = *position;
        }

        Some(last)
    }

    /// Removes and returns the last position of the contiguous run starting right after the last
    /// checkpointed one, if that run is not empty.
    pub fn take_committable(&mut self) -> Option<CommitPosition> {
        match self.positions.first() {
            Some(first) if first.sequence == self.next_sequence => (),
            _ => return None,
        }

        let committable: CommitPosition = self.first_before_gap()?;
        self.positions = self.positions.split_off(&CommitPosition {
            sequence: committable.sequence + 1,
            ..committable
        });
        self.next_sequence = committable.sequence + 1;

        Some(committable)
    }

    /// Sequence expected next for the checkpoint to move.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Confirmed positions waiting for a gap to be filled.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// The greatest element of `positions` such that every ordinal from the minimum of `positions` up to
/// it is present. Duplicates are ignored.
pub fn first_before_gap(positions: &[u64]) -> Option<u64> {
    let sorted: BTreeSet<u64> = positions.iter().copied().collect();
    let mut iter = sorted.into_iter();
    let mut last: u64 = iter.next()?;

    for position in iter {
        if position != last + 1 {
            break;
        }
        last = position;
    }

    Some(last)
}
