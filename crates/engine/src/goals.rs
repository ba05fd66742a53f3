//! Savings goals.
//!
//! A goal tracks the net effect of matching transactions posted on or after
//! its creation; it never rewrites history before that. Overshoot is
//! preserved (`current` is never clamped) and the active → achieved
//! transition is one-way, so later corrective edits cannot flap the status.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Amount, EngineError, ResultEngine, Transaction, TransactionKind, util};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "value", rename_all = "snake_case")]
pub enum GoalScope {
    Category(String),
    Tag(String),
    Global,
}

impl GoalScope {
    fn kind_str(&self) -> &'static str {
        match self {
            Self::Category(_) => "category",
            Self::Tag(_) => "tag",
            Self::Global => "global",
        }
    }

    fn value_str(&self) -> Option<&str> {
        match self {
            Self::Category(value) | Self::Tag(value) => Some(value),
            Self::Global => None,
        }
    }

    fn from_parts(kind: &str, value: Option<String>) -> ResultEngine<Self> {
        match (kind, value) {
            ("category", Some(value)) => Ok(Self::Category(value)),
            ("tag", Some(value)) => Ok(Self::Tag(value)),
            ("global", None) => Ok(Self::Global),
            (other, _) => Err(EngineError::Validation(format!(
                "invalid goal scope: {other}"
            ))),
        }
    }

    fn matches(&self, tx: &Transaction) -> bool {
        match self {
            Self::Category(category) => tx.in_category(category),
            Self::Tag(tag) => tx.has_tag(tag),
            Self::Global => true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Achieved,
    Abandoned,
}

impl GoalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Achieved => "achieved",
            Self::Abandoned => "abandoned",
        }
    }
}

impl TryFrom<&str> for GoalStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "active" => Ok(Self::Active),
            "achieved" => Ok(Self::Achieved),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(EngineError::Validation(format!(
                "invalid goal status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub name: String,
    pub scope: GoalScope,
    pub target_amount: Amount,
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
    /// Transactions dated before this day never count toward the goal.
    pub created_on: NaiveDate,
}

impl Goal {
    pub fn new(
        name: String,
        scope: GoalScope,
        target_amount: Amount,
        created_at: DateTime<Utc>,
    ) -> ResultEngine<Self> {
        if !target_amount.is_positive() {
            return Err(EngineError::Validation(
                "goal target must be > 0".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            scope,
            target_amount,
            status: GoalStatus::Active,
            created_at,
            created_on: created_at.date_naive(),
        })
    }

    /// Net signed effect of matching transactions since creation.
    ///
    /// Income counts positive, expenses negative, investments positive
    /// (money moved into positions is saved money), transfers are neutral.
    /// Never clamped, so overshoot survives.
    pub fn current_amount(&self, transactions: &[Transaction]) -> Amount {
        transactions
            .iter()
            .filter(|tx| {
                !tx.is_voided()
                    && tx.posted_date >= self.created_on
                    && self.scope.matches(tx)
            })
            .map(|tx| match tx.kind {
                TransactionKind::Income | TransactionKind::Investment => tx.amount,
                TransactionKind::Expense => -tx.amount,
                TransactionKind::Transfer => Amount::ZERO,
            })
            .sum()
    }

    pub fn progress(&self, transactions: &[Transaction]) -> GoalProgress {
        let current = self.current_amount(transactions);
        GoalProgress {
            current,
            target: self.target_amount,
            fraction: current.fraction_of(self.target_amount).clamp(0.0, 1.0),
            status: self.status,
        }
    }

    /// Active → achieved when current ≥ target; achieved never reverts.
    pub(crate) fn refresh_status(&mut self, transactions: &[Transaction]) -> bool {
        if self.status == GoalStatus::Active
            && self.current_amount(transactions) >= self.target_amount
        {
            self.status = GoalStatus::Achieved;
            return true;
        }
        false
    }

    pub(crate) fn check_abandon(&self) -> ResultEngine<()> {
        if self.status != GoalStatus::Active {
            return Err(EngineError::Validation(format!(
                "only active goals can be abandoned, this one is {}",
                self.status.as_str()
            )));
        }
        Ok(())
    }

    pub(crate) fn abandon(&mut self) -> ResultEngine<()> {
        self.check_abandon()?;
        self.status = GoalStatus::Abandoned;
        Ok(())
    }
}

/// Read-only progress snapshot for the reporting layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GoalProgress {
    pub current: Amount,
    pub target: Amount,
    /// Clamped to `[0, 1]` for display; `current` keeps the overshoot.
    pub fraction: f64,
    pub status: GoalStatus,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "goals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub scope_kind: String,
    pub scope_value: Option<String>,
    pub target_minor: i64,
    pub status: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Goal> for ActiveModel {
    fn from(goal: &Goal) -> Self {
        Self {
            id: ActiveValue::Set(goal.id.to_string()),
            name: ActiveValue::Set(goal.name.clone()),
            scope_kind: ActiveValue::Set(goal.scope.kind_str().to_string()),
            scope_value: ActiveValue::Set(goal.scope.value_str().map(|s| s.to_string())),
            target_minor: ActiveValue::Set(goal.target_amount.minor()),
            status: ActiveValue::Set(goal.status.as_str().to_string()),
            created_at: ActiveValue::Set(goal.created_at),
        }
    }
}

impl TryFrom<Model> for Goal {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: util::parse_uuid(&model.id, "goal")?,
            name: model.name,
            scope: GoalScope::from_parts(&model.scope_kind, model.scope_value)?,
            target_amount: Amount::new(model.target_minor),
            status: GoalStatus::try_from(model.status.as_str())?,
            created_at: model.created_at,
            created_on: model.created_at.date_naive(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::TimeZone;

    use super::*;
    use crate::Source;

    fn tx(kind: TransactionKind, amount: i64, date: (i32, u32, u32), tag: &str) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            seq: 1,
            posted_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            kind,
            amount: Amount::new(amount),
            category: None,
            tags: BTreeSet::from([tag.to_string()]),
            description: "test".to_string(),
            account_from: Some(Uuid::new_v4()),
            account_to: Some(Uuid::new_v4()),
            source: Source::Manual,
            fingerprint: None,
            created_at: Utc::now(),
            voided_at: None,
            replaces: None,
        }
    }

    fn goal() -> Goal {
        Goal::new(
            "Emergency fund".to_string(),
            GoalScope::Tag("emergency".to_string()),
            Amount::new(1_000_00),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn history_before_creation_never_counts() {
        let goal = goal();
        let txs = vec![
            tx(TransactionKind::Income, 500_00, (2025, 12, 31), "emergency"),
            tx(TransactionKind::Income, 300_00, (2026, 1, 2), "emergency"),
        ];
        assert_eq!(goal.current_amount(&txs), Amount::new(300_00));
    }

    #[test]
    fn expenses_subtract_and_transfers_are_neutral() {
        let goal = goal();
        let txs = vec![
            tx(TransactionKind::Income, 500_00, (2026, 1, 2), "emergency"),
            tx(TransactionKind::Expense, 100_00, (2026, 1, 3), "emergency"),
            tx(TransactionKind::Transfer, 999_00, (2026, 1, 4), "emergency"),
            tx(TransactionKind::Investment, 50_00, (2026, 1, 5), "emergency"),
        ];
        assert_eq!(goal.current_amount(&txs), Amount::new(450_00));
    }

    #[test]
    fn fraction_clamps_but_current_keeps_overshoot() {
        let goal = goal();
        let txs = vec![tx(TransactionKind::Income, 1_500_00, (2026, 2, 1), "emergency")];
        let progress = goal.progress(&txs);
        assert_eq!(progress.current, Amount::new(1_500_00));
        assert_eq!(progress.fraction, 1.0);
    }

    #[test]
    fn achieved_is_one_way() {
        let mut goal = goal();
        let txs = vec![tx(TransactionKind::Income, 1_000_00, (2026, 2, 1), "emergency")];
        assert!(goal.refresh_status(&txs));
        assert_eq!(goal.status, GoalStatus::Achieved);

        // A corrective edit drops current below target; status holds.
        assert!(!goal.refresh_status(&[]));
        assert_eq!(goal.status, GoalStatus::Achieved);
        assert!(goal.abandon().is_err());
    }
}
