//! Derived account balances.
//!
//! The ledger keeps an incremental running total per account and, every
//! [`RECONCILE_EVERY`] mutations, cross-checks it against a full recompute
//! from the transaction sequence. Drift means a bug somewhere: the recomputed
//! value is adopted as the safe fallback, but the fault is remembered and
//! surfaced to callers instead of being silently repaired.

use std::collections::HashMap;

use uuid::Uuid;

use crate::{
    Amount, EngineError, ResultEngine, Transaction,
    events::{EventKind, LedgerEvent},
};

/// Mutations between two reconciliation passes.
const RECONCILE_EVERY: u32 = 16;

#[derive(Debug, Default)]
pub struct BalanceLedger {
    balances: HashMap<Uuid, Amount>,
    /// Accounts whose incremental value disagreed with the recompute, with
    /// the (incremental, recomputed) pair observed at detection time.
    faults: HashMap<Uuid, (Amount, Amount)>,
    mutations_since_check: u32,
}

impl BalanceLedger {
    /// Seed the ledger with a full from-scratch recompute.
    pub fn from_recompute(transactions: &[Transaction]) -> Self {
        Self {
            balances: recompute(transactions),
            faults: HashMap::new(),
            mutations_since_check: 0,
        }
    }

    pub fn track(&mut self, account_id: Uuid) {
        self.balances.entry(account_id).or_insert(Amount::ZERO);
    }

    /// Current balance of an account.
    ///
    /// If the last reconciliation found drift on this account the call
    /// returns [`EngineError::ConsistencyFault`]; the recomputed value inside
    /// the error is the safe fallback already adopted by the ledger.
    pub fn balance(&self, account_id: Uuid) -> ResultEngine<Amount> {
        if let Some((incremental, recomputed)) = self.faults.get(&account_id) {
            return Err(EngineError::ConsistencyFault {
                account_id,
                incremental: *incremental,
                recomputed: *recomputed,
            });
        }
        self.balances
            .get(&account_id)
            .copied()
            .ok_or_else(|| EngineError::KeyNotFound(account_id.to_string()))
    }

    /// Apply one committed event incrementally, then reconcile if due.
    ///
    /// A transfer debits and credits inside the same application: there is no
    /// externally observable intermediate state.
    pub fn apply(&mut self, event: &LedgerEvent, transactions: &[Transaction]) {
        match &event.kind {
            EventKind::Posted(tx) => self.apply_effects(tx, 1),
            EventKind::Voided(tx) => self.apply_effects(tx, -1),
            EventKind::Amended { voided, posted } => {
                self.apply_effects(voided, -1);
                self.apply_effects(posted, 1);
            }
        }

        self.mutations_since_check += 1;
        if self.mutations_since_check >= RECONCILE_EVERY {
            self.reconcile(transactions);
        }
    }

    fn apply_effects(&mut self, tx: &Transaction, direction: i64) {
        for (account_id, delta) in tx.effects() {
            let signed = if direction < 0 { -delta } else { delta };
            *self.balances.entry(account_id).or_insert(Amount::ZERO) += signed;
        }
    }

    /// Full cross-check of every tracked account against the transaction
    /// sequence. Drift marks the account faulted and adopts the recomputed
    /// value; a clean pass clears earlier fault marks.
    pub fn reconcile(&mut self, transactions: &[Transaction]) {
        self.mutations_since_check = 0;
        let fresh = recompute(transactions);
        let mut faults = HashMap::new();

        for (&account_id, &incremental) in &self.balances {
            let recomputed = fresh.get(&account_id).copied().unwrap_or(Amount::ZERO);
            if incremental != recomputed {
                tracing::warn!(
                    account = %account_id,
                    %incremental,
                    %recomputed,
                    "balance drift detected, adopting recomputed value"
                );
                faults.insert(account_id, (incremental, recomputed));
            }
        }

        for (&account_id, &(_, recomputed)) in &faults {
            self.balances.insert(account_id, recomputed);
        }
        self.faults = faults;
    }
}

/// Balance of every account touched by non-voided transactions, from scratch.
pub fn recompute(transactions: &[Transaction]) -> HashMap<Uuid, Amount> {
    let mut balances: HashMap<Uuid, Amount> = HashMap::new();
    for tx in transactions.iter().filter(|tx| !tx.is_voided()) {
        for (account_id, delta) in tx.effects() {
            *balances.entry(account_id).or_insert(Amount::ZERO) += delta;
        }
    }
    balances
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{NaiveDate, Utc};

    use super::*;
    use crate::{Source, TransactionKind};

    fn tx(seq: i64, kind: TransactionKind, amount: i64, from: Option<Uuid>, to: Option<Uuid>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            seq,
            posted_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            kind,
            amount: Amount::new(amount),
            category: None,
            tags: BTreeSet::new(),
            description: "test".to_string(),
            account_from: from,
            account_to: to,
            source: Source::Manual,
            fingerprint: None,
            created_at: Utc::now(),
            voided_at: None,
            replaces: None,
        }
    }

    fn posted(tx: &Transaction) -> LedgerEvent {
        LedgerEvent {
            seq: tx.seq,
            recorded_at: Utc::now(),
            kind: EventKind::Posted(tx.clone()),
        }
    }

    #[test]
    fn incremental_matches_recompute() {
        let checking = Uuid::new_v4();
        let savings = Uuid::new_v4();
        let history = vec![
            tx(1, TransactionKind::Income, 10_000, None, Some(checking)),
            tx(2, TransactionKind::Expense, 2_500, Some(checking), None),
            tx(3, TransactionKind::Transfer, 4_000, Some(checking), Some(savings)),
        ];

        let mut ledger = BalanceLedger::default();
        ledger.track(checking);
        ledger.track(savings);
        for event_tx in &history {
            ledger.apply(&posted(event_tx), &history);
        }

        let fresh = recompute(&history);
        assert_eq!(ledger.balance(checking).unwrap(), fresh[&checking]);
        assert_eq!(ledger.balance(savings).unwrap(), fresh[&savings]);
        assert_eq!(ledger.balance(checking).unwrap(), Amount::new(3_500));
        assert_eq!(ledger.balance(savings).unwrap(), Amount::new(4_000));
    }

    #[test]
    fn drift_is_surfaced_and_fallback_adopted() {
        let account = Uuid::new_v4();
        let history = vec![tx(1, TransactionKind::Income, 1_000, None, Some(account))];

        let mut ledger = BalanceLedger::from_recompute(&history);
        // Corrupt the incremental value, then force a reconciliation pass.
        ledger.balances.insert(account, Amount::new(999));
        ledger.reconcile(&history);

        match ledger.balance(account) {
            Err(EngineError::ConsistencyFault {
                account_id,
                incremental,
                recomputed,
            }) => {
                assert_eq!(account_id, account);
                assert_eq!(incremental, Amount::new(999));
                assert_eq!(recomputed, Amount::new(1_000));
            }
            other => panic!("expected consistency fault, got {other:?}"),
        }

        // A later clean pass clears the fault and keeps the adopted value.
        ledger.reconcile(&history);
        assert_eq!(ledger.balance(account).unwrap(), Amount::new(1_000));
    }

    #[test]
    fn voided_transactions_are_excluded() {
        let account = Uuid::new_v4();
        let mut voided = tx(1, TransactionKind::Income, 1_000, None, Some(account));
        voided.voided_at = Some(Utc::now());
        let history = vec![voided];
        assert!(recompute(&history).get(&account).is_none());
    }
}
