//! Transaction primitives.
//!
//! A `Transaction` is an atomic financial event. Once posted it is immutable:
//! edits are a paired tombstone + repost recorded as one logical event, and
//! deletes are tombstones. Rows are never physically erased, so every derived
//! value stays recomputable from scratch.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Amount, EngineError, ResultEngine, util};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Expense,
    Income,
    Transfer,
    Investment,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Income => "income",
            Self::Transfer => "transfer",
            Self::Investment => "investment",
        }
    }
}

impl TryFrom<&str> for TransactionKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "expense" => Ok(Self::Expense),
            "income" => Ok(Self::Income),
            "transfer" => Ok(Self::Transfer),
            "investment" => Ok(Self::Investment),
            other => Err(EngineError::Validation(format!(
                "invalid transaction kind: {other}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Manual,
    Imported,
    /// Materialized from a recurring template.
    Recurring,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Imported => "imported",
            Self::Recurring => "recurring",
        }
    }
}

impl TryFrom<&str> for Source {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "manual" => Ok(Self::Manual),
            "imported" => Ok(Self::Imported),
            "recurring" => Ok(Self::Recurring),
            other => Err(EngineError::Validation(format!(
                "invalid transaction source: {other}"
            ))),
        }
    }
}

/// A mutation request for a new (or replacement) transaction.
///
/// Drafts carry no identity; the store assigns id and sequence number when
/// the draft is accepted. [`TransactionDraft::validate`] checks the
/// structural constraints, so a rejected draft never touches state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub posted_date: NaiveDate,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub category: Option<String>,
    pub tags: BTreeSet<String>,
    pub description: String,
    pub account_from: Option<Uuid>,
    pub account_to: Option<Uuid>,
    pub source: Source,
    pub fingerprint: Option<String>,
}

impl TransactionDraft {
    /// A manual draft with the account sides filled per kind.
    pub fn manual(
        posted_date: NaiveDate,
        kind: TransactionKind,
        amount: Amount,
        description: String,
        account_from: Option<Uuid>,
        account_to: Option<Uuid>,
    ) -> Self {
        Self {
            posted_date,
            kind,
            amount,
            category: None,
            tags: BTreeSet::new(),
            description,
            account_from,
            account_to,
            source: Source::Manual,
            fingerprint: None,
        }
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn with_tags<I: IntoIterator<Item = String>>(mut self, tags: I) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    /// Validates structural constraints; no partial state is ever produced
    /// from an invalid draft.
    pub fn validate(&self) -> ResultEngine<()> {
        if !self.amount.is_positive() {
            return Err(EngineError::Validation(
                "amount must be > 0".to_string(),
            ));
        }

        match self.kind {
            TransactionKind::Transfer => {
                let (Some(from), Some(to)) = (self.account_from, self.account_to) else {
                    return Err(EngineError::Validation(
                        "transfer requires account_from and account_to".to_string(),
                    ));
                };
                if from == to {
                    return Err(EngineError::Validation(
                        "transfer accounts must differ".to_string(),
                    ));
                }
            }
            TransactionKind::Expense | TransactionKind::Investment => {
                if self.account_from.is_none() || self.account_to.is_some() {
                    return Err(EngineError::Validation(format!(
                        "{} requires exactly account_from",
                        self.kind.as_str()
                    )));
                }
            }
            TransactionKind::Income => {
                if self.account_to.is_none() || self.account_from.is_some() {
                    return Err(EngineError::Validation(
                        "income requires exactly account_to".to_string(),
                    ));
                }
            }
        }

        match self.source {
            Source::Imported if self.fingerprint.is_none() => Err(EngineError::Validation(
                "imported transaction requires a fingerprint".to_string(),
            )),
            Source::Manual | Source::Recurring if self.fingerprint.is_some() => {
                Err(EngineError::Validation(
                    "only imported transactions carry a fingerprint".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    /// Position in the append order; assigned by the store.
    pub seq: i64,
    pub posted_date: NaiveDate,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub category: Option<String>,
    pub tags: BTreeSet<String>,
    pub description: String,
    pub account_from: Option<Uuid>,
    pub account_to: Option<Uuid>,
    pub source: Source,
    pub fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Tombstone: set once, never cleared.
    pub voided_at: Option<DateTime<Utc>>,
    /// Edit lineage: the transaction this one replaced in an amend.
    pub replaces: Option<Uuid>,
}

impl Transaction {
    pub(crate) fn from_draft(
        draft: TransactionDraft,
        seq: i64,
        created_at: DateTime<Utc>,
        replaces: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq,
            posted_date: draft.posted_date,
            kind: draft.kind,
            amount: draft.amount,
            category: draft.category,
            tags: draft.tags,
            description: draft.description,
            account_from: draft.account_from,
            account_to: draft.account_to,
            source: draft.source,
            fingerprint: draft.fingerprint,
            created_at,
            voided_at: None,
            replaces,
        }
    }

    pub fn is_voided(&self) -> bool {
        self.voided_at.is_some()
    }

    /// The draft that would recreate this transaction verbatim.
    pub fn to_draft(&self) -> TransactionDraft {
        TransactionDraft {
            posted_date: self.posted_date,
            kind: self.kind,
            amount: self.amount,
            category: self.category.clone(),
            tags: self.tags.clone(),
            description: self.description.clone(),
            account_from: self.account_from,
            account_to: self.account_to,
            source: self.source,
            fingerprint: self.fingerprint.clone(),
        }
    }

    /// Signed effect of this transaction on each touched account.
    ///
    /// For a transfer the two effects always net to zero (conservation).
    pub fn effects(&self) -> Vec<(Uuid, Amount)> {
        match self.kind {
            TransactionKind::Expense | TransactionKind::Investment => self
                .account_from
                .map(|account| (account, -self.amount))
                .into_iter()
                .collect(),
            TransactionKind::Income => self
                .account_to
                .map(|account| (account, self.amount))
                .into_iter()
                .collect(),
            TransactionKind::Transfer => {
                match (self.account_from, self.account_to) {
                    (Some(from), Some(to)) => vec![(from, -self.amount), (to, self.amount)],
                    // Unreachable for validated drafts.
                    _ => Vec::new(),
                }
            }
        }
    }

    /// Whether a non-voided transaction matches a category binding.
    pub fn in_category(&self, category: &str) -> bool {
        self.category.as_deref() == Some(category)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub seq: i64,
    pub posted_date: Date,
    pub kind: String,
    pub amount_minor: i64,
    pub category: Option<String>,
    pub tags: String,
    pub description: String,
    pub account_from: Option<String>,
    pub account_to: Option<String>,
    pub source: String,
    pub fingerprint: Option<String>,
    pub created_at: DateTimeUtc,
    pub voided_at: Option<DateTimeUtc>,
    pub replaces: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "Column::AccountFrom",
        to = "super::accounts::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    FromAccount,
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&Transaction> for ActiveModel {
    type Error = EngineError;

    fn try_from(tx: &Transaction) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ActiveValue::Set(tx.id.to_string()),
            seq: ActiveValue::Set(tx.seq),
            posted_date: ActiveValue::Set(tx.posted_date),
            kind: ActiveValue::Set(tx.kind.as_str().to_string()),
            amount_minor: ActiveValue::Set(tx.amount.minor()),
            category: ActiveValue::Set(tx.category.clone()),
            tags: ActiveValue::Set(util::tags_to_json(&tx.tags)?),
            description: ActiveValue::Set(tx.description.clone()),
            account_from: ActiveValue::Set(tx.account_from.map(|id| id.to_string())),
            account_to: ActiveValue::Set(tx.account_to.map(|id| id.to_string())),
            source: ActiveValue::Set(tx.source.as_str().to_string()),
            fingerprint: ActiveValue::Set(tx.fingerprint.clone()),
            created_at: ActiveValue::Set(tx.created_at),
            voided_at: ActiveValue::Set(tx.voided_at),
            replaces: ActiveValue::Set(tx.replaces.map(|id| id.to_string())),
        })
    }
}

impl TryFrom<Model> for Transaction {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: util::parse_uuid(&model.id, "transaction")?,
            seq: model.seq,
            posted_date: model.posted_date,
            kind: TransactionKind::try_from(model.kind.as_str())?,
            amount: Amount::new(model.amount_minor),
            category: model.category,
            tags: util::tags_from_json(&model.tags)?,
            description: model.description,
            account_from: model
                .account_from
                .as_deref()
                .map(|id| util::parse_uuid(id, "account"))
                .transpose()?,
            account_to: model
                .account_to
                .as_deref()
                .map(|id| util::parse_uuid(id, "account"))
                .transpose()?,
            source: Source::try_from(model.source.as_str())?,
            fingerprint: model.fingerprint,
            created_at: model.created_at,
            voided_at: model.voided_at,
            replaces: model
                .replaces
                .as_deref()
                .map(|id| util::parse_uuid(id, "transaction"))
                .transpose()?,
        })
    }
}
