//! Ledger consistency and envelope budgeting engine.
//!
//! The engine is the single writer for one person's financial data: an
//! append-oriented transaction store with derived account balances, envelope
//! budgets with monthly rollover, savings goals, batch import with duplicate
//! detection, and a bounded undo stack.
//!
//! In-memory state is the source of truth for derived values; every accepted
//! mutation is persisted through sea-orm before memory is touched, and the
//! builder reloads everything from the database on startup. All mutating
//! methods take `&mut self` and reads take `&self`, so wrapping the engine in
//! a read-write lock gives callers serialized mutations and snapshot reads.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveValue, DatabaseTransaction, QueryOrder, TransactionTrait, prelude::*,
};
use uuid::Uuid;

pub use accounts::Account;
pub use allocation::{BudgetGroup, autocorrect as autocorrect_split, validate as validate_split};
pub use envelopes::{Envelope, EnvelopeBinding, RolloverOutcome};
pub use error::EngineError;
pub use events::{EventKind, LedgerEvent};
pub use goals::{Goal, GoalProgress, GoalScope, GoalStatus};
pub use import::{
    AcceptedRow, CandidateRow, Classification, ClassifyRules, ImportBatch, ImportReport, NoRules,
    RejectReason, SubstringRules,
};
pub use money::Amount;
pub use month::Month;
pub use recurring::RecurringTemplate;
pub use transactions::{Source, Transaction, TransactionDraft, TransactionKind};
pub use undo::{InverseOp, UndoEntry, UndoStack};

mod accounts;
mod allocation;
mod envelopes;
mod error;
mod events;
mod goals;
mod import;
mod ledger;
mod money;
mod month;
mod recurring;
mod transactions;
mod undo;
mod util;

type ResultEngine<T> = Result<T, EngineError>;

#[derive(Debug)]
pub struct Engine {
    database: DatabaseConnection,
    accounts: HashMap<Uuid, Account>,
    /// Canonical sequence, append order, tombstones included.
    transactions: Vec<Transaction>,
    tx_index: HashMap<Uuid, usize>,
    events: events::EventLog,
    next_seq: i64,
    balances: ledger::BalanceLedger,
    envelopes: envelopes::EnvelopeBook,
    goals: HashMap<Uuid, Goal>,
    recurring: recurring::RecurringBook,
    split: Vec<BudgetGroup>,
    /// Fingerprints of non-voided imported transactions.
    fingerprints: HashSet<String>,
    undo: UndoStack,
}

impl Engine {
    /// Return a builder for `Engine`.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    fn next_seq(&mut self) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn tx_by_id(&self, transaction_id: Uuid) -> ResultEngine<&Transaction> {
        self.tx_index
            .get(&transaction_id)
            .map(|index| &self.transactions[*index])
            .ok_or_else(|| EngineError::KeyNotFound("transaction not exists".to_string()))
    }

    fn ensure_account_usable(&self, account_id: Uuid) -> ResultEngine<()> {
        let account = self
            .accounts
            .get(&account_id)
            .ok_or_else(|| EngineError::KeyNotFound("account not exists".to_string()))?;
        if account.archived {
            return Err(EngineError::Validation(format!(
                "account \"{}\" is archived",
                account.name
            )));
        }
        Ok(())
    }

    fn validate_draft(&self, draft: &TransactionDraft) -> ResultEngine<()> {
        draft.validate()?;
        for account_id in [draft.account_from, draft.account_to].into_iter().flatten() {
            self.ensure_account_usable(account_id)?;
        }
        if let Some(fingerprint) = &draft.fingerprint
            && self.fingerprints.contains(fingerprint)
        {
            return Err(EngineError::DuplicateImport(fingerprint.clone()));
        }
        Ok(())
    }

    // ── Accounts ───────────────────────────────────────────────────────────

    pub async fn new_account(&mut self, name: &str) -> ResultEngine<Uuid> {
        if self.accounts.values().any(|a| a.name == name) {
            return Err(EngineError::ExistingKey(name.to_string()));
        }

        let account = Account::new(name.to_string(), Utc::now());
        let account_id = account.id;
        accounts::ActiveModel::from(&account)
            .insert(&self.database)
            .await?;

        self.balances.track(account_id);
        self.accounts.insert(account_id, account);
        Ok(account_id)
    }

    /// Soft-disable; the account keeps its history and stays queryable.
    pub async fn archive_account(&mut self, account_id: Uuid) -> ResultEngine<()> {
        self.account(account_id)?;

        let model = accounts::ActiveModel {
            id: ActiveValue::Set(account_id.to_string()),
            archived: ActiveValue::Set(true),
            ..Default::default()
        };
        model.update(&self.database).await?;

        if let Some(account) = self.accounts.get_mut(&account_id) {
            account.archive();
        }
        Ok(())
    }

    pub fn account(&self, account_id: Uuid) -> ResultEngine<&Account> {
        self.accounts
            .get(&account_id)
            .ok_or_else(|| EngineError::KeyNotFound("account not exists".to_string()))
    }

    pub fn account_by_name(&self, name: &str) -> ResultEngine<&Account> {
        self.accounts
            .values()
            .find(|a| a.name == name)
            .ok_or_else(|| EngineError::KeyNotFound(name.to_string()))
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    // ── Transaction store ──────────────────────────────────────────────────

    /// Validate and append a transaction; no partial append on rejection.
    pub async fn post(&mut self, draft: TransactionDraft) -> ResultEngine<Uuid> {
        let transaction_id = self.apply_post(draft, None).await?;
        self.record_undo(InverseOp::Void { transaction_id }).await?;
        Ok(transaction_id)
    }

    /// Tombstone a transaction; it stays readable for audit but is excluded
    /// from every derived computation.
    pub async fn void(&mut self, transaction_id: Uuid) -> ResultEngine<()> {
        let voided = self.apply_void(transaction_id).await?;
        self.record_undo(InverseOp::Repost {
            draft: voided.to_draft(),
        })
        .await?;
        Ok(())
    }

    /// Replace a transaction's content: tombstone plus repost, committed and
    /// notified as one logical edit event, reversible as one undo entry.
    pub async fn amend(
        &mut self,
        transaction_id: Uuid,
        draft: TransactionDraft,
    ) -> ResultEngine<Uuid> {
        let old_draft = self.tx_by_id(transaction_id)?.to_draft();
        let new_id = self.apply_amend(transaction_id, draft).await?;
        self.record_undo(InverseOp::Amend {
            transaction_id: new_id,
            draft: old_draft,
        })
        .await?;
        Ok(new_id)
    }

    /// Committed events with `seq > cursor`, oldest first (this process).
    pub fn events_since(&self, cursor: i64) -> &[LedgerEvent] {
        self.events.since(cursor)
    }

    /// Audit read: includes tombstoned transactions.
    pub fn transaction(&self, transaction_id: Uuid) -> ResultEngine<&Transaction> {
        self.tx_by_id(transaction_id)
    }

    /// Flat non-voided sequence for the reporting/export collaborator.
    pub fn export_rows(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|tx| !tx.is_voided())
    }

    async fn apply_post(
        &mut self,
        draft: TransactionDraft,
        replaces: Option<Uuid>,
    ) -> ResultEngine<Uuid> {
        self.validate_draft(&draft)?;

        let now = Utc::now();
        let seq = self.next_seq();
        let tx = Transaction::from_draft(draft, seq, now, replaces);

        let db_tx = self.database.begin().await?;
        transactions::ActiveModel::try_from(&tx)?
            .insert(&db_tx)
            .await?;
        if let Some(fingerprint) = &tx.fingerprint {
            self.insert_fingerprint(&db_tx, fingerprint, tx.id).await?;
        }
        db_tx.commit().await?;

        let event = LedgerEvent {
            seq,
            recorded_at: now,
            kind: EventKind::Posted(tx.clone()),
        };
        if let Some(fingerprint) = &tx.fingerprint {
            self.fingerprints.insert(fingerprint.clone());
        }
        self.tx_index.insert(tx.id, self.transactions.len());
        let tx_id = tx.id;
        self.transactions.push(tx);
        self.balances.apply(&event, &self.transactions);
        self.events.push(event);
        self.refresh_goals().await?;

        tracing::info!(transaction = %tx_id, seq, "posted");
        Ok(tx_id)
    }

    async fn apply_void(&mut self, transaction_id: Uuid) -> ResultEngine<Transaction> {
        let index = *self
            .tx_index
            .get(&transaction_id)
            .ok_or_else(|| EngineError::KeyNotFound("transaction not exists".to_string()))?;
        if self.transactions[index].is_voided() {
            return Err(EngineError::Validation(
                "transaction already voided".to_string(),
            ));
        }

        let now = Utc::now();
        let db_tx = self.database.begin().await?;
        let model = transactions::ActiveModel {
            id: ActiveValue::Set(transaction_id.to_string()),
            voided_at: ActiveValue::Set(Some(now)),
            ..Default::default()
        };
        model.update(&db_tx).await?;
        if let Some(fingerprint) = self.transactions[index].fingerprint.clone() {
            import::fingerprint_rows::Entity::delete_by_id(fingerprint)
                .exec(&db_tx)
                .await?;
        }
        db_tx.commit().await?;

        self.transactions[index].voided_at = Some(now);
        if let Some(fingerprint) = &self.transactions[index].fingerprint {
            self.fingerprints.remove(fingerprint);
        }
        let voided = self.transactions[index].clone();
        let event = LedgerEvent {
            seq: self.next_seq(),
            recorded_at: now,
            kind: EventKind::Voided(voided.clone()),
        };
        self.balances.apply(&event, &self.transactions);
        self.events.push(event);
        // A void can raise a goal's net effect (removing an expense).
        self.refresh_goals().await?;

        tracing::info!(transaction = %transaction_id, "voided");
        Ok(voided)
    }

    async fn apply_amend(
        &mut self,
        transaction_id: Uuid,
        draft: TransactionDraft,
    ) -> ResultEngine<Uuid> {
        self.validate_draft(&draft)?;

        let index = *self
            .tx_index
            .get(&transaction_id)
            .ok_or_else(|| EngineError::KeyNotFound("transaction not exists".to_string()))?;
        if self.transactions[index].is_voided() {
            return Err(EngineError::Validation(
                "cannot amend a voided transaction".to_string(),
            ));
        }

        let now = Utc::now();
        let seq = self.next_seq();
        let new_tx = Transaction::from_draft(draft, seq, now, Some(transaction_id));

        // One database transaction, one logical event: dependents never see
        // the tombstone without its replacement.
        let db_tx = self.database.begin().await?;
        let old_model = transactions::ActiveModel {
            id: ActiveValue::Set(transaction_id.to_string()),
            voided_at: ActiveValue::Set(Some(now)),
            ..Default::default()
        };
        old_model.update(&db_tx).await?;
        if let Some(fingerprint) = self.transactions[index].fingerprint.clone() {
            import::fingerprint_rows::Entity::delete_by_id(fingerprint)
                .exec(&db_tx)
                .await?;
        }
        transactions::ActiveModel::try_from(&new_tx)?
            .insert(&db_tx)
            .await?;
        if let Some(fingerprint) = &new_tx.fingerprint {
            self.insert_fingerprint(&db_tx, fingerprint, new_tx.id).await?;
        }
        db_tx.commit().await?;

        self.transactions[index].voided_at = Some(now);
        if let Some(fingerprint) = &self.transactions[index].fingerprint {
            self.fingerprints.remove(fingerprint);
        }
        if let Some(fingerprint) = &new_tx.fingerprint {
            self.fingerprints.insert(fingerprint.clone());
        }
        let voided = self.transactions[index].clone();
        self.tx_index.insert(new_tx.id, self.transactions.len());
        let new_id = new_tx.id;
        self.transactions.push(new_tx.clone());
        let event = LedgerEvent {
            seq,
            recorded_at: now,
            kind: EventKind::Amended {
                voided,
                posted: new_tx,
            },
        };
        self.balances.apply(&event, &self.transactions);
        self.events.push(event);
        self.refresh_goals().await?;

        tracing::info!(old = %transaction_id, new = %new_id, "amended");
        Ok(new_id)
    }

    async fn insert_fingerprint(
        &self,
        db_tx: &DatabaseTransaction,
        fingerprint: &str,
        transaction_id: Uuid,
    ) -> ResultEngine<()> {
        let model = import::fingerprint_rows::ActiveModel {
            fingerprint: ActiveValue::Set(fingerprint.to_string()),
            transaction_id: ActiveValue::Set(transaction_id.to_string()),
        };
        model.insert(db_tx).await?;
        Ok(())
    }

    // ── Balance ledger ─────────────────────────────────────────────────────

    /// Derived balance of an account.
    ///
    /// Surfaces [`EngineError::ConsistencyFault`] when the periodic
    /// reconciliation found drift; the recomputed value carried inside the
    /// error is the safe fallback already adopted.
    pub fn balance(&self, account_id: Uuid) -> ResultEngine<Amount> {
        self.account(account_id)?;
        self.balances.balance(account_id)
    }

    /// Balance as of an inclusive date, recomputed from scratch.
    pub fn balance_as_of(&self, account_id: Uuid, as_of: NaiveDate) -> ResultEngine<Amount> {
        self.account(account_id)?;
        Ok(self
            .transactions
            .iter()
            .filter(|tx| !tx.is_voided() && tx.posted_date <= as_of)
            .flat_map(|tx| tx.effects())
            .filter(|(touched, _)| *touched == account_id)
            .map(|(_, delta)| delta)
            .sum())
    }

    /// Force a full reconciliation pass right now.
    pub fn reconcile(&mut self) {
        self.balances.reconcile(&self.transactions);
    }

    // ── Envelope budget ────────────────────────────────────────────────────

    pub async fn new_envelope(
        &mut self,
        name: &str,
        binding: EnvelopeBinding,
        monthly_allocation: Amount,
        initial_rollover: Amount,
    ) -> ResultEngine<Uuid> {
        if self.envelopes.by_name(name).is_some() {
            return Err(EngineError::ExistingKey(name.to_string()));
        }
        if monthly_allocation.is_negative() {
            return Err(EngineError::Validation(
                "allocation must be >= 0".to_string(),
            ));
        }

        let envelope = Envelope::new(
            name.to_string(),
            binding,
            monthly_allocation,
            initial_rollover,
            Utc::now(),
        );
        let envelope_id = envelope.id;
        envelopes::ActiveModel::from(&envelope)
            .insert(&self.database)
            .await?;
        self.envelopes.insert(envelope);
        Ok(envelope_id)
    }

    /// Soft-disable; historical transactions keep referencing the envelope.
    pub async fn disable_envelope(&mut self, envelope_id: Uuid) -> ResultEngine<()> {
        self.envelopes.get(envelope_id)?;
        let model = envelopes::ActiveModel {
            id: ActiveValue::Set(envelope_id.to_string()),
            disabled: ActiveValue::Set(true),
            ..Default::default()
        };
        model.update(&self.database).await?;

        self.envelopes.get_mut(envelope_id)?.disabled = true;
        Ok(())
    }

    pub fn envelope(&self, envelope_id: Uuid) -> ResultEngine<&Envelope> {
        self.envelopes.get(envelope_id)
    }

    pub fn envelope_by_name(&self, name: &str) -> ResultEngine<&Envelope> {
        self.envelopes
            .by_name(name)
            .ok_or_else(|| EngineError::KeyNotFound(name.to_string()))
    }

    pub fn envelopes(&self) -> impl Iterator<Item = &Envelope> {
        self.envelopes.iter()
    }

    /// Set one month's allocation override. Undoable.
    pub async fn allocate(
        &mut self,
        envelope_id: Uuid,
        month: Month,
        amount: Amount,
    ) -> ResultEngine<()> {
        let previous = self.envelopes.check_allocate(envelope_id, month, amount)?;
        self.persist_allocation(envelope_id, month, Some(amount))
            .await?;
        self.envelopes.restore_allocation(envelope_id, month, amount);
        self.record_undo(InverseOp::Allocate {
            envelope_id,
            month,
            previous,
        })
        .await?;
        Ok(())
    }

    async fn persist_allocation(
        &self,
        envelope_id: Uuid,
        month: Month,
        amount: Option<Amount>,
    ) -> ResultEngine<()> {
        let key = (envelope_id.to_string(), month.to_string());
        match amount {
            Some(amount) => {
                let existing = envelopes::allocation_rows::Entity::find_by_id(key.clone())
                    .one(&self.database)
                    .await?;
                let model = envelopes::allocation_rows::ActiveModel {
                    envelope_id: ActiveValue::Set(key.0),
                    month: ActiveValue::Set(key.1),
                    amount_minor: ActiveValue::Set(amount.minor()),
                };
                if existing.is_some() {
                    model.update(&self.database).await?;
                } else {
                    model.insert(&self.database).await?;
                }
            }
            None => {
                envelopes::allocation_rows::Entity::delete_by_id(key)
                    .exec(&self.database)
                    .await?;
            }
        }
        Ok(())
    }

    pub fn allocation(&self, envelope_id: Uuid, month: Month) -> ResultEngine<Amount> {
        self.envelopes.allocation(envelope_id, month)
    }

    /// Matched expense total for the month, sign-adjusted (positive).
    pub fn spent(&self, envelope_id: Uuid, month: Month) -> ResultEngine<Amount> {
        self.envelopes.spent(envelope_id, month, &self.transactions)
    }

    /// Close a month for an envelope and return the stored rollover balance.
    ///
    /// Idempotent: repeating the call returns the stored value untouched.
    pub async fn rollover(&mut self, envelope_id: Uuid, month: Month) -> ResultEngine<Amount> {
        let today = Utc::now().date_naive();
        let outcome = self
            .envelopes
            .preview_rollover(envelope_id, month, &self.transactions, today)?;

        if let RolloverOutcome::Applied(balance) = outcome {
            let db_tx = self.database.begin().await?;
            let row = envelopes::rollover_rows::ActiveModel {
                envelope_id: ActiveValue::Set(envelope_id.to_string()),
                month: ActiveValue::Set(month.to_string()),
                balance_minor: ActiveValue::Set(balance.minor()),
            };
            row.insert(&db_tx).await?;
            let envelope_model = envelopes::ActiveModel {
                id: ActiveValue::Set(envelope_id.to_string()),
                rollover_minor: ActiveValue::Set(balance.minor()),
                ..Default::default()
            };
            envelope_model.update(&db_tx).await?;
            db_tx.commit().await?;
            self.envelopes.commit_rollover(envelope_id, month, balance)?;
            tracing::info!(envelope = %envelope_id, %month, %balance, "month closed");
        }
        Ok(outcome.balance())
    }

    /// Operator override: treat a month as over before its last day passes.
    pub fn force_close(&mut self, month: Month) {
        self.envelopes.force_close(month);
    }

    // ── Goals ──────────────────────────────────────────────────────────────

    pub async fn new_goal(
        &mut self,
        name: &str,
        scope: GoalScope,
        target_amount: Amount,
    ) -> ResultEngine<Uuid> {
        if self.goals.values().any(|g| g.name == name) {
            return Err(EngineError::ExistingKey(name.to_string()));
        }
        let goal = Goal::new(name.to_string(), scope, target_amount, Utc::now())?;
        let goal_id = goal.id;
        goals::ActiveModel::from(&goal).insert(&self.database).await?;
        self.goals.insert(goal_id, goal);
        Ok(goal_id)
    }

    pub async fn abandon_goal(&mut self, goal_id: Uuid) -> ResultEngine<()> {
        self.goals
            .get(&goal_id)
            .ok_or_else(|| EngineError::KeyNotFound("goal not exists".to_string()))?
            .check_abandon()?;

        let model = goals::ActiveModel {
            id: ActiveValue::Set(goal_id.to_string()),
            status: ActiveValue::Set(GoalStatus::Abandoned.as_str().to_string()),
            ..Default::default()
        };
        model.update(&self.database).await?;

        if let Some(goal) = self.goals.get_mut(&goal_id) {
            goal.abandon()?;
        }
        Ok(())
    }

    pub fn progress(&self, goal_id: Uuid) -> ResultEngine<GoalProgress> {
        let goal = self
            .goals
            .get(&goal_id)
            .ok_or_else(|| EngineError::KeyNotFound("goal not exists".to_string()))?;
        Ok(goal.progress(&self.transactions))
    }

    pub fn goal_by_name(&self, name: &str) -> ResultEngine<&Goal> {
        self.goals
            .values()
            .find(|g| g.name == name)
            .ok_or_else(|| EngineError::KeyNotFound(name.to_string()))
    }

    pub fn goals(&self) -> impl Iterator<Item = &Goal> {
        self.goals.values()
    }

    /// Active → achieved transitions after a store mutation; one-way.
    async fn refresh_goals(&mut self) -> ResultEngine<()> {
        let mut achieved: Vec<Uuid> = Vec::new();
        for goal in self.goals.values_mut() {
            if goal.refresh_status(&self.transactions) {
                achieved.push(goal.id);
            }
        }
        for goal_id in achieved {
            let model = goals::ActiveModel {
                id: ActiveValue::Set(goal_id.to_string()),
                status: ActiveValue::Set(GoalStatus::Achieved.as_str().to_string()),
                ..Default::default()
            };
            model.update(&self.database).await?;
            tracing::info!(goal = %goal_id, "goal achieved");
        }
        Ok(())
    }

    // ── Recurring templates ────────────────────────────────────────────────

    pub async fn new_recurring(
        &mut self,
        name: &str,
        amount: Amount,
        day_of_month: u32,
        account_id: Uuid,
        category: Option<String>,
    ) -> ResultEngine<Uuid> {
        if self.recurring.by_name(name).is_some() {
            return Err(EngineError::ExistingKey(name.to_string()));
        }
        self.ensure_account_usable(account_id)?;

        let template = RecurringTemplate::new(
            name.to_string(),
            amount,
            day_of_month,
            account_id,
            category,
            Utc::now(),
        )?;
        let template_id = template.id;
        recurring::ActiveModel::from(&template)
            .insert(&self.database)
            .await?;
        self.recurring.insert(template);
        Ok(template_id)
    }

    /// Pause or resume a template; its posted charges are untouched.
    pub async fn set_recurring_active(
        &mut self,
        template_id: Uuid,
        active: bool,
    ) -> ResultEngine<()> {
        self.recurring.get(template_id)?;
        let model = recurring::ActiveModel {
            id: ActiveValue::Set(template_id.to_string()),
            active: ActiveValue::Set(active),
            ..Default::default()
        };
        model.update(&self.database).await?;

        self.recurring.get_mut(template_id)?.active = active;
        Ok(())
    }

    pub fn recurring_by_name(&self, name: &str) -> ResultEngine<&RecurringTemplate> {
        self.recurring
            .by_name(name)
            .ok_or_else(|| EngineError::KeyNotFound(name.to_string()))
    }

    pub fn recurring_templates(&self) -> impl Iterator<Item = &RecurringTemplate> {
        self.recurring.iter()
    }

    /// Materialize the month's charge for every active template that has
    /// none yet; returns the created transaction ids.
    ///
    /// Idempotent per `(template, month)`: applied months are recorded, so a
    /// repeated run creates nothing and a voided charge stays voided. A
    /// template whose account was archived since is skipped, not fatal.
    pub async fn apply_recurring(&mut self, month: Month) -> ResultEngine<Vec<Uuid>> {
        let mut created = Vec::new();
        for template_id in self.recurring.due(month) {
            let template = self.recurring.get(template_id)?.clone();
            if self.ensure_account_usable(template.account_id).is_err() {
                tracing::warn!(template = %template.name, "recurring charge skipped, account unusable");
                continue;
            }

            let run = recurring::run_rows::ActiveModel {
                template_id: ActiveValue::Set(template_id.to_string()),
                month: ActiveValue::Set(month.to_string()),
            };
            run.insert(&self.database).await?;
            self.recurring.mark_applied(template_id, month);

            let mut draft = TransactionDraft::manual(
                template.due_date(month),
                TransactionKind::Expense,
                template.amount,
                template.name.clone(),
                Some(template.account_id),
                None,
            )
            .with_category(template.category.clone());
            draft.source = Source::Recurring;
            created.push(self.apply_post(draft, None).await?);
        }
        if !created.is_empty() {
            tracing::info!(%month, count = created.len(), "recurring charges materialized");
        }
        Ok(created)
    }

    // ── Budget split ───────────────────────────────────────────────────────

    /// Validate and commit the budget group percentages. A committed split
    /// always sums to exactly 100.
    pub async fn set_budget_split(&mut self, groups: Vec<BudgetGroup>) -> ResultEngine<()> {
        allocation::validate(&groups)?;

        let db_tx = self.database.begin().await?;
        allocation::Entity::delete_many().exec(&db_tx).await?;
        for group in &groups {
            let model = allocation::ActiveModel {
                label: ActiveValue::Set(group.label.clone()),
                percent: ActiveValue::Set(group.percent as i32),
            };
            model.insert(&db_tx).await?;
        }
        db_tx.commit().await?;

        self.split = groups;
        Ok(())
    }

    pub fn budget_split(&self) -> &[BudgetGroup] {
        &self.split
    }

    // ── Import ─────────────────────────────────────────────────────────────

    /// Classify a batch without touching state: per-row accept/reject
    /// against all previously accepted fingerprints.
    pub fn classify(
        &self,
        rows: Vec<CandidateRow>,
        rules: &dyn ClassifyRules,
    ) -> ImportReport {
        import::classify(rows, &self.fingerprints, rules)
    }

    /// Classify and ingest a batch: accepted rows are posted against
    /// `account_id` (expenses debit it, income credits it) and the batch is
    /// recorded for audit. Rejected rows are reported, never fatal.
    pub async fn import_batch(
        &mut self,
        rows: Vec<CandidateRow>,
        rules: &dyn ClassifyRules,
        account_id: Uuid,
    ) -> ResultEngine<ImportReport> {
        self.ensure_account_usable(account_id)?;

        let total = rows.len();
        let report = self.classify(rows, rules);
        for accepted in &report.accepted {
            let (account_from, account_to) = match accepted.kind {
                TransactionKind::Income => (None, Some(account_id)),
                _ => (Some(account_id), None),
            };
            let draft = TransactionDraft {
                posted_date: accepted.row.posted_date,
                kind: accepted.kind,
                amount: accepted.row.amount.abs(),
                category: accepted.category.clone(),
                tags: accepted.tags.iter().cloned().collect(),
                description: accepted.row.counterparty.clone(),
                account_from,
                account_to,
                source: Source::Imported,
                fingerprint: Some(accepted.fingerprint.clone()),
            };
            self.post(draft).await?;
        }

        let batch = ImportBatch {
            id: Uuid::new_v4(),
            imported_at: Utc::now(),
            total,
            accepted: report.accepted.len(),
            rejected: report.rejected.len(),
        };
        import::ActiveModel::from(&batch)
            .insert(&self.database)
            .await?;
        tracing::info!(
            batch = %batch.id,
            total,
            accepted = batch.accepted,
            rejected = batch.rejected,
            "import batch ingested"
        );
        Ok(report)
    }

    // ── Undo ───────────────────────────────────────────────────────────────

    async fn record_undo(&mut self, inverse: InverseOp) -> ResultEngine<()> {
        let entry = UndoEntry {
            id: Uuid::new_v4(),
            inverse,
            recorded_at: Utc::now(),
        };
        undo::ActiveModel::try_from(&entry)?
            .insert(&self.database)
            .await?;
        if let Some(evicted) = self.undo.record(entry) {
            undo::Entity::delete_by_id(evicted.id.to_string())
                .exec(&self.database)
                .await?;
        }
        Ok(())
    }

    /// Reverse the most recent recorded operation by applying its inverse as
    /// a new forward mutation. An empty stack is the benign
    /// [`EngineError::NothingToUndo`] condition.
    pub async fn undo(&mut self) -> ResultEngine<()> {
        let entry = self
            .undo
            .peek()
            .cloned()
            .ok_or(EngineError::NothingToUndo)?;

        match entry.inverse {
            InverseOp::Void { transaction_id } => {
                self.apply_void(transaction_id).await?;
            }
            InverseOp::Repost { draft } => {
                self.apply_post(draft, None).await?;
            }
            InverseOp::Amend {
                transaction_id,
                draft,
            } => {
                self.apply_amend(transaction_id, draft).await?;
            }
            InverseOp::Allocate {
                envelope_id,
                month,
                previous,
            } => {
                self.persist_allocation(envelope_id, month, previous).await?;
                match previous {
                    Some(amount) => {
                        self.envelopes.restore_allocation(envelope_id, month, amount);
                    }
                    None => {
                        self.envelopes.clear_allocation(envelope_id, month);
                    }
                }
            }
        }

        // The inverse applied; only now is the entry consumed. A failed
        // inverse leaves it on the stack for a retry.
        self.undo.pop()?;
        undo::Entity::delete_by_id(entry.id.to_string())
            .exec(&self.database)
            .await?;
        Ok(())
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }
}

/// The builder for `Engine`: reloads the whole state from the database.
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
}

impl EngineBuilder {
    /// Pass the required database.
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Construct `Engine`, recomputing every derived value from scratch.
    pub async fn build(self) -> ResultEngine<Engine> {
        let mut accounts = HashMap::new();
        for model in accounts::Entity::find().all(&self.database).await? {
            let account = Account::try_from(model)?;
            accounts.insert(account.id, account);
        }

        let mut transactions = Vec::new();
        let mut tx_index = HashMap::new();
        let mut fingerprints = HashSet::new();
        let tx_models = transactions::Entity::find()
            .order_by_asc(transactions::Column::Seq)
            .all(&self.database)
            .await?;
        for model in tx_models {
            let tx = Transaction::try_from(model)?;
            if !tx.is_voided()
                && let Some(fingerprint) = &tx.fingerprint
            {
                fingerprints.insert(fingerprint.clone());
            }
            tx_index.insert(tx.id, transactions.len());
            transactions.push(tx);
        }
        let next_seq = transactions.last().map(|tx| tx.seq + 1).unwrap_or(1);

        let mut balances = ledger::BalanceLedger::from_recompute(&transactions);
        for account_id in accounts.keys() {
            balances.track(*account_id);
        }

        let mut envelope_book = envelopes::EnvelopeBook::default();
        for model in envelopes::Entity::find().all(&self.database).await? {
            envelope_book.insert(Envelope::try_from(model)?);
        }
        for model in envelopes::allocation_rows::Entity::find()
            .all(&self.database)
            .await?
        {
            envelope_book.restore_allocation(
                util::parse_uuid(&model.envelope_id, "envelope")?,
                Month::try_from(model.month.as_str())?,
                Amount::new(model.amount_minor),
            );
        }
        for model in envelopes::rollover_rows::Entity::find()
            .all(&self.database)
            .await?
        {
            envelope_book.restore_rollover(
                util::parse_uuid(&model.envelope_id, "envelope")?,
                Month::try_from(model.month.as_str())?,
                Amount::new(model.balance_minor),
            );
        }

        let mut goals = HashMap::new();
        for model in goals::Entity::find().all(&self.database).await? {
            let goal = Goal::try_from(model)?;
            goals.insert(goal.id, goal);
        }

        let mut recurring_book = recurring::RecurringBook::default();
        for model in recurring::Entity::find().all(&self.database).await? {
            recurring_book.insert(RecurringTemplate::try_from(model)?);
        }
        for model in recurring::run_rows::Entity::find().all(&self.database).await? {
            recurring_book.mark_applied(
                util::parse_uuid(&model.template_id, "recurring template")?,
                Month::try_from(model.month.as_str())?,
            );
        }

        let mut split = Vec::new();
        for model in allocation::Entity::find().all(&self.database).await? {
            split.push(BudgetGroup::try_from(model)?);
        }

        let mut undo_stack = UndoStack::default();
        let mut undo_models = undo::Entity::find().all(&self.database).await?;
        undo_models.sort_by_key(|model| model.recorded_at);
        let skip = undo_models.len().saturating_sub(UndoStack::CAPACITY);
        for model in undo_models.into_iter().skip(skip) {
            undo_stack.record(UndoEntry::try_from(model)?);
        }

        Ok(Engine {
            database: self.database,
            accounts,
            transactions,
            tx_index,
            events: events::EventLog::default(),
            next_seq,
            balances,
            envelopes: envelope_book,
            goals,
            recurring: recurring_book,
            split,
            fingerprints,
            undo: undo_stack,
        })
    }
}
