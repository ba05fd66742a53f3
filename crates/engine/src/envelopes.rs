//! Envelope budgeting.
//!
//! An envelope is a budget bucket bound to a category or a tag, with a
//! monthly allocation and a carried-forward (rollover) balance. The rollover
//! is a pure function of allocation history and matched expenses:
//!
//! `rollover(month) = rollover(month - 1) + allocation(month) - spent(month)`
//!
//! A negative rollover is deliberate: chronic overspending reduces the next
//! month's effective allocation instead of being masked by clamping to zero.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Amount, EngineError, Month, ResultEngine, Transaction, TransactionKind, util};

/// What an envelope matches transactions by.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "bind", content = "value", rename_all = "snake_case")]
pub enum EnvelopeBinding {
    Category(String),
    Tag(String),
}

impl EnvelopeBinding {
    fn kind_str(&self) -> &'static str {
        match self {
            Self::Category(_) => "category",
            Self::Tag(_) => "tag",
        }
    }

    fn value_str(&self) -> &str {
        match self {
            Self::Category(value) | Self::Tag(value) => value,
        }
    }

    fn from_parts(kind: &str, value: String) -> ResultEngine<Self> {
        match kind {
            "category" => Ok(Self::Category(value)),
            "tag" => Ok(Self::Tag(value)),
            other => Err(EngineError::Validation(format!(
                "invalid envelope binding: {other}"
            ))),
        }
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        match self {
            Self::Category(category) => tx.in_category(category),
            Self::Tag(tag) => tx.has_tag(tag),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub name: String,
    pub binding: EnvelopeBinding,
    /// Default allocation for months without an explicit override.
    pub monthly_allocation: Amount,
    /// Carried balance after the last closed month. Signed; negative means
    /// overspend carried forward. Only the rollover computation writes it.
    pub rollover_balance: Amount,
    /// Soft-disable: historical transactions may still reference the
    /// envelope, so it is never deleted.
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(
        name: String,
        binding: EnvelopeBinding,
        monthly_allocation: Amount,
        initial_rollover: Amount,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            binding,
            monthly_allocation,
            rollover_balance: initial_rollover,
            disabled: false,
            created_at,
        }
    }
}

/// The envelope budget engine: envelopes plus their allocation overrides and
/// closed rollovers.
#[derive(Debug, Default)]
pub struct EnvelopeBook {
    envelopes: HashMap<Uuid, Envelope>,
    /// Per-month allocation overrides; absent months use the envelope's
    /// `monthly_allocation`.
    allocations: HashMap<(Uuid, Month), Amount>,
    /// Stored rollovers; presence makes `rollover` an O(1) idempotent read.
    rollovers: HashMap<(Uuid, Month), Amount>,
    /// Latest closed month per envelope; months close strictly in order.
    last_closed: HashMap<Uuid, Month>,
    /// Months force-closed by the operator before the wall clock passed them.
    force_closed: BTreeSet<Month>,
}

/// Result of a rollover call, distinguishing the idempotent replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RolloverOutcome {
    Applied(Amount),
    /// The pair was already closed; the stored balance is returned untouched.
    AlreadyApplied(Amount),
}

impl RolloverOutcome {
    #[must_use]
    pub fn balance(self) -> Amount {
        match self {
            Self::Applied(balance) | Self::AlreadyApplied(balance) => balance,
        }
    }
}

impl EnvelopeBook {
    pub fn insert(&mut self, envelope: Envelope) {
        self.envelopes.insert(envelope.id, envelope);
    }

    pub fn get(&self, envelope_id: Uuid) -> ResultEngine<&Envelope> {
        self.envelopes
            .get(&envelope_id)
            .ok_or_else(|| EngineError::KeyNotFound("envelope not exists".to_string()))
    }

    pub fn get_mut(&mut self, envelope_id: Uuid) -> ResultEngine<&mut Envelope> {
        self.envelopes
            .get_mut(&envelope_id)
            .ok_or_else(|| EngineError::KeyNotFound("envelope not exists".to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Envelope> {
        self.envelopes.values()
    }

    pub fn by_name(&self, name: &str) -> Option<&Envelope> {
        self.envelopes.values().find(|e| e.name == name)
    }

    pub(crate) fn restore_allocation(&mut self, envelope_id: Uuid, month: Month, amount: Amount) {
        self.allocations.insert((envelope_id, month), amount);
    }

    pub(crate) fn restore_rollover(&mut self, envelope_id: Uuid, month: Month, balance: Amount) {
        self.rollovers.insert((envelope_id, month), balance);
        let newest = self
            .last_closed
            .get(&envelope_id)
            .is_none_or(|closed| *closed < month);
        if newest {
            self.last_closed.insert(envelope_id, month);
        }
    }

    /// Validation half of [`Self::allocate`]: rejects the change and reports
    /// the previous override without mutating, so callers can persist the
    /// accepted value before touching memory.
    pub fn check_allocate(
        &self,
        envelope_id: Uuid,
        month: Month,
        amount: Amount,
    ) -> ResultEngine<Option<Amount>> {
        self.get(envelope_id)?;
        if amount.is_negative() {
            return Err(EngineError::Validation(
                "allocation must be >= 0".to_string(),
            ));
        }
        if self.rollovers.contains_key(&(envelope_id, month)) {
            return Err(EngineError::Validation(format!(
                "month {month} is already closed for this envelope"
            )));
        }
        Ok(self.allocations.get(&(envelope_id, month)).copied())
    }

    /// Set the allocation for one month. Rejected once that month's rollover
    /// is closed, otherwise the stored rollover would no longer be a pure
    /// function of its inputs.
    pub fn allocate(
        &mut self,
        envelope_id: Uuid,
        month: Month,
        amount: Amount,
    ) -> ResultEngine<Option<Amount>> {
        let previous = self.check_allocate(envelope_id, month, amount)?;
        self.allocations.insert((envelope_id, month), amount);
        Ok(previous)
    }

    pub(crate) fn clear_allocation(&mut self, envelope_id: Uuid, month: Month) -> Option<Amount> {
        self.allocations.remove(&(envelope_id, month))
    }

    pub fn allocation(&self, envelope_id: Uuid, month: Month) -> ResultEngine<Amount> {
        let envelope = self.get(envelope_id)?;
        Ok(self
            .allocations
            .get(&(envelope_id, month))
            .copied()
            .unwrap_or(envelope.monthly_allocation))
    }

    /// Matched expenses dated within the month, as a positive total.
    ///
    /// Only expenses reduce an envelope; income, transfers and investments in
    /// the same category pass through untouched.
    pub fn spent(
        &self,
        envelope_id: Uuid,
        month: Month,
        transactions: &[Transaction],
    ) -> ResultEngine<Amount> {
        let envelope = self.get(envelope_id)?;
        Ok(transactions
            .iter()
            .filter(|tx| {
                !tx.is_voided()
                    && tx.kind == TransactionKind::Expense
                    && month.contains(tx.posted_date)
                    && envelope.binding.matches(tx)
            })
            .map(|tx| tx.amount)
            .sum())
    }

    pub fn force_close(&mut self, month: Month) {
        self.force_closed.insert(month);
    }

    fn month_is_closed(&self, month: Month, today: NaiveDate) -> bool {
        month.is_past(today) || self.force_closed.contains(&month)
    }

    /// Compute what closing `month` would store, without mutating. Callers
    /// persist an [`RolloverOutcome::Applied`] balance first, then commit it
    /// with [`Self::commit_rollover`].
    pub fn preview_rollover(
        &self,
        envelope_id: Uuid,
        month: Month,
        transactions: &[Transaction],
        today: NaiveDate,
    ) -> ResultEngine<RolloverOutcome> {
        if let Some(stored) = self.rollovers.get(&(envelope_id, month)) {
            return Ok(RolloverOutcome::AlreadyApplied(*stored));
        }
        if !self.month_is_closed(month, today) {
            return Err(EngineError::Validation(format!(
                "month {month} is not over yet"
            )));
        }
        if let Some(closed) = self.last_closed.get(&envelope_id).copied()
            && closed.next() != month
        {
            return Err(EngineError::Validation(format!(
                "months close in order: expected {}, got {month}",
                closed.next()
            )));
        }

        let allocation = self.allocation(envelope_id, month)?;
        let spent = self.spent(envelope_id, month, transactions)?;
        let prior = match self.last_closed.get(&envelope_id) {
            Some(closed) => self.rollovers[&(envelope_id, *closed)],
            // First close seeds from the envelope's carried balance.
            None => self.get(envelope_id)?.rollover_balance,
        };

        Ok(RolloverOutcome::Applied(prior + allocation - spent))
    }

    /// Store a previewed balance as the month's closed rollover.
    pub(crate) fn commit_rollover(
        &mut self,
        envelope_id: Uuid,
        month: Month,
        balance: Amount,
    ) -> ResultEngine<()> {
        self.rollovers.insert((envelope_id, month), balance);
        self.last_closed.insert(envelope_id, month);
        self.get_mut(envelope_id)?.rollover_balance = balance;
        Ok(())
    }

    /// Close a month for an envelope and store its rollover balance.
    ///
    /// Idempotent: a second call for the same `(envelope, month)` returns the
    /// stored balance without re-applying the allocation. The month must be
    /// over (or force-closed) and months close strictly in order.
    pub fn rollover(
        &mut self,
        envelope_id: Uuid,
        month: Month,
        transactions: &[Transaction],
        today: NaiveDate,
    ) -> ResultEngine<RolloverOutcome> {
        let outcome = self.preview_rollover(envelope_id, month, transactions, today)?;
        if let RolloverOutcome::Applied(balance) = outcome {
            self.commit_rollover(envelope_id, month, balance)?;
        }
        Ok(outcome)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "envelopes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub bind_kind: String,
    pub bind_value: String,
    pub allocation_minor: i64,
    pub rollover_minor: i64,
    pub disabled: bool,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Envelope> for ActiveModel {
    fn from(envelope: &Envelope) -> Self {
        Self {
            id: ActiveValue::Set(envelope.id.to_string()),
            name: ActiveValue::Set(envelope.name.clone()),
            bind_kind: ActiveValue::Set(envelope.binding.kind_str().to_string()),
            bind_value: ActiveValue::Set(envelope.binding.value_str().to_string()),
            allocation_minor: ActiveValue::Set(envelope.monthly_allocation.minor()),
            rollover_minor: ActiveValue::Set(envelope.rollover_balance.minor()),
            disabled: ActiveValue::Set(envelope.disabled),
            created_at: ActiveValue::Set(envelope.created_at),
        }
    }
}

impl TryFrom<Model> for Envelope {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: util::parse_uuid(&model.id, "envelope")?,
            name: model.name,
            binding: EnvelopeBinding::from_parts(&model.bind_kind, model.bind_value)?,
            monthly_allocation: Amount::new(model.allocation_minor),
            rollover_balance: Amount::new(model.rollover_minor),
            disabled: model.disabled,
            created_at: model.created_at,
        })
    }
}

/// Per-month allocation overrides.
pub mod allocation_rows {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "envelope_allocations")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub envelope_id: String,
        #[sea_orm(primary_key, auto_increment = false)]
        pub month: String,
        pub amount_minor: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Stored rollovers of closed months.
pub mod rollover_rows {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "envelope_rollovers")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub envelope_id: String,
        #[sea_orm(primary_key, auto_increment = false)]
        pub month: String,
        pub balance_minor: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
