//! Retention policies applied while paging through an address's history.
//!
//! [`KeepAll`] accumulates every transaction. [`TopKSelector`] keeps only the
//! `k` largest eligible transfers in a bounded min-heap so memory stays
//! proportional to `k` regardless of how many pages the explorer returns.

use crate::ethereum::{canonical, parse_units};
use crate::schemas::{RawTransaction, TraceDirection, TransferKind};
use alloy_primitives::U256;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Strategy deciding which fetched transactions survive pagination
pub trait RetentionPolicy {
    /// Offer one decoded transaction
    fn offer(&mut self, tx: RawTransaction);

    /// Number of transactions currently retained
    fn retained(&self) -> usize;

    /// Final retained set, in output order
    fn into_transactions(self) -> Vec<RawTransaction>;
}

/// Unbounded accumulation in arrival order
#[derive(Debug, Default)]
pub struct KeepAll {
    transactions: Vec<RawTransaction>,
}

impl KeepAll {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RetentionPolicy for KeepAll {
    fn offer(&mut self, tx: RawTransaction) {
        self.transactions.push(tx);
    }

    fn retained(&self) -> usize {
        self.transactions.len()
    }

    fn into_transactions(self) -> Vec<RawTransaction> {
        self.transactions
    }
}

/// Heap entry ordered by (value, timestamp, arrival)
#[derive(Debug)]
struct Candidate {
    value: U256,
    timestamp: i64,
    arrival: u64,
    tx: RawTransaction,
}

impl Candidate {
    fn key(&self) -> (U256, i64, u64) {
        (self.value, self.timestamp, self.arrival)
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Keeps the `k` highest-value eligible transfers for one address.
///
/// Eligible means: matches the direction relative to the target address and,
/// for native transfers, carries no call data. Contract calls never compete on
/// value, whatever the classifier is told to keep.
#[derive(Debug)]
pub struct TopKSelector {
    capacity: usize,
    target: String,
    direction: TraceDirection,
    kind: TransferKind,
    heap: BinaryHeap<Reverse<Candidate>>,
    arrivals: u64,
    eligible: usize,
}

impl TopKSelector {
    pub fn new(
        capacity: usize,
        target: &str,
        direction: TraceDirection,
        kind: TransferKind,
    ) -> Self {
        Self {
            capacity,
            target: canonical(target),
            direction,
            kind,
            heap: BinaryHeap::with_capacity(capacity),
            arrivals: 0,
            eligible: 0,
        }
    }

    /// Eligible transactions seen so far, retained or not
    pub fn eligible_seen(&self) -> usize {
        self.eligible
    }

    fn is_eligible(&self, tx: &RawTransaction) -> bool {
        if self.kind == TransferKind::Native && !tx.is_pure_transfer() {
            return false;
        }
        let to_target = canonical(&tx.to) == self.target;
        let from_target = canonical(&tx.from) == self.target;
        match self.direction {
            TraceDirection::In => to_target,
            TraceDirection::Out => from_target,
            TraceDirection::All => to_target || from_target,
        }
    }
}

impl RetentionPolicy for TopKSelector {
    fn offer(&mut self, tx: RawTransaction) {
        if self.capacity == 0 || !self.is_eligible(&tx) {
            return;
        }
        self.eligible += 1;

        let candidate = Candidate {
            value: parse_units(&tx.value),
            timestamp: tx.unix_timestamp(),
            arrival: self.arrivals,
            tx,
        };
        self.arrivals += 1;

        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(candidate));
            return;
        }

        // Only a strictly larger value displaces the current minimum
        let displaces = self
            .heap
            .peek()
            .map(|Reverse(min)| candidate.value > min.value)
            .unwrap_or(false);
        if displaces {
            self.heap.pop();
            self.heap.push(Reverse(candidate));
        }
    }

    fn retained(&self) -> usize {
        self.heap.len()
    }

    fn into_transactions(self) -> Vec<RawTransaction> {
        let mut kept: Vec<Candidate> = self.heap.into_iter().map(|Reverse(c)| c).collect();
        kept.sort_by(|a, b| {
            b.value
                .cmp(&a.value)
                .then(a.timestamp.cmp(&b.timestamp))
                .then(a.arrival.cmp(&b.arrival))
        });
        kept.into_iter().map(|c| c.tx).collect()
    }
}
