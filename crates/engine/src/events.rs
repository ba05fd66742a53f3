//! Ledger change events.
//!
//! Every committed mutation of the transaction store produces exactly one
//! [`LedgerEvent`]. The balance ledger consumes events incrementally; other
//! dependents (envelopes, goals) recompute from the canonical transaction
//! sequence, so the event carries the full transaction content rather than
//! just an id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Transaction;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// A new transaction was appended.
    Posted(Transaction),
    /// A transaction was tombstoned; carries its content as of voiding.
    Voided(Transaction),
    /// One logical edit: tombstone plus replacement, applied together so
    /// dependents recompute exactly once.
    Amended {
        voided: Transaction,
        posted: Transaction,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Global mutation sequence number, strictly increasing.
    pub seq: i64,
    pub recorded_at: DateTime<Utc>,
    pub kind: EventKind,
}

/// Ordered in-memory event log for the current process.
///
/// The canonical record is the `transactions` table; the log exists so
/// dependents can be notified incrementally and so callers can page changes
/// with [`EventLog::since`].
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<LedgerEvent>,
}

impl EventLog {
    pub fn push(&mut self, event: LedgerEvent) {
        debug_assert!(
            self.events
                .last()
                .is_none_or(|last| last.seq < event.seq),
            "event log must stay ordered"
        );
        self.events.push(event);
    }

    /// Events with `seq > cursor`, oldest first. A cursor of 0 returns the
    /// whole log.
    pub fn since(&self, cursor: i64) -> &[LedgerEvent] {
        let start = self.events.partition_point(|event| event.seq <= cursor);
        &self.events[start..]
    }

    pub fn last_seq(&self) -> Option<i64> {
        self.events.last().map(|event| event.seq)
    }
}
