//! The module contains the `Account` struct and its persistence model.

use chrono::{DateTime, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, util};

/// An account.
///
/// An account represents a real place where money sits: a bank account, a
/// cash wallet, a brokerage cash balance. Its balance is always **derived**
/// from the transaction sequence; it is never stored as a mutable field, so
/// it cannot drift from the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable identifier, generated once and persisted.
    pub id: Uuid,
    pub name: String,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(name: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            archived: false,
            created_at,
        }
    }

    pub fn archive(&mut self) {
        self.archived = true;
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub archived: bool,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Account> for ActiveModel {
    fn from(account: &Account) -> Self {
        Self {
            id: ActiveValue::Set(account.id.to_string()),
            name: ActiveValue::Set(account.name.clone()),
            archived: ActiveValue::Set(account.archived),
            created_at: ActiveValue::Set(account.created_at),
        }
    }
}

impl TryFrom<Model> for Account {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: util::parse_uuid(&model.id, "account")?,
            name: model.name,
            archived: model.archived,
            created_at: model.created_at,
        })
    }
}
