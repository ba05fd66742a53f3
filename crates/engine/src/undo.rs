//! Bounded undo stack.
//!
//! Every mutating operation records an inverse descriptor. `undo` pops the
//! most recent one and replays it through the store as a *new* forward
//! mutation (compensation, not time travel), which keeps the append-only
//! model intact. The stack holds the last [`UndoStack::CAPACITY`] entries;
//! the oldest is discarded first on overflow.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Amount, EngineError, Month, ResultEngine, TransactionDraft, util};

/// The compensating mutation that reverses one recorded operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InverseOp {
    /// Reverses a post: tombstone the created transaction.
    Void { transaction_id: Uuid },
    /// Reverses a void: repost the same content (a fresh id, same effects).
    Repost { draft: TransactionDraft },
    /// Reverses an amend: amend the replacement back to the original draft.
    Amend {
        transaction_id: Uuid,
        draft: TransactionDraft,
    },
    /// Reverses an allocation change: restore the previous override, or
    /// clear it when there was none.
    Allocate {
        envelope_id: Uuid,
        month: Month,
        previous: Option<Amount>,
    },
}

impl InverseOp {
    /// Label used for the persisted row and for operator-facing listings.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Void { .. } => "post",
            Self::Repost { .. } => "void",
            Self::Amend { .. } => "amend",
            Self::Allocate { .. } => "allocate",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UndoEntry {
    pub id: Uuid,
    pub inverse: InverseOp,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct UndoStack {
    entries: VecDeque<UndoEntry>,
}

impl UndoStack {
    pub const CAPACITY: usize = 10;

    /// Push an entry; returns the evicted oldest entry when full.
    pub fn record(&mut self, entry: UndoEntry) -> Option<UndoEntry> {
        let evicted = if self.entries.len() == Self::CAPACITY {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// The entry `pop` would return, without consuming it.
    pub fn peek(&self) -> Option<&UndoEntry> {
        self.entries.back()
    }

    pub fn pop(&mut self) -> ResultEngine<UndoEntry> {
        self.entries.pop_back().ok_or(EngineError::NothingToUndo)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent last, same order as undo would consume them in reverse.
    pub fn iter(&self) -> impl Iterator<Item = &UndoEntry> {
        self.entries.iter()
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "undo_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub kind: String,
    pub inverse: String,
    pub recorded_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&UndoEntry> for ActiveModel {
    type Error = EngineError;

    fn try_from(entry: &UndoEntry) -> Result<Self, Self::Error> {
        let inverse = serde_json::to_string(&entry.inverse)
            .map_err(|err| EngineError::Validation(format!("unserializable inverse: {err}")))?;
        Ok(Self {
            id: ActiveValue::Set(entry.id.to_string()),
            kind: ActiveValue::Set(entry.inverse.kind().to_string()),
            inverse: ActiveValue::Set(inverse),
            recorded_at: ActiveValue::Set(entry.recorded_at),
        })
    }
}

impl TryFrom<Model> for UndoEntry {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let inverse: InverseOp = serde_json::from_str(&model.inverse)
            .map_err(|err| EngineError::Validation(format!("invalid stored inverse: {err}")))?;
        Ok(Self {
            id: util::parse_uuid(&model.id, "undo entry")?,
            inverse,
            recorded_at: model.recorded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u32) -> UndoEntry {
        UndoEntry {
            id: Uuid::new_v4(),
            inverse: InverseOp::Allocate {
                envelope_id: Uuid::new_v4(),
                month: Month::new(2026, 1).unwrap(),
                previous: Some(Amount::new(i64::from(n))),
            },
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn pop_on_empty_is_nothing_to_undo() {
        let mut stack = UndoStack::default();
        assert_eq!(stack.pop().unwrap_err(), EngineError::NothingToUndo);
    }

    #[test]
    fn lifo_order() {
        let mut stack = UndoStack::default();
        let first = entry(1);
        let second = entry(2);
        stack.record(first.clone());
        stack.record(second.clone());
        assert_eq!(stack.pop().unwrap(), second);
        assert_eq!(stack.pop().unwrap(), first);
    }

    #[test]
    fn overflow_evicts_oldest_first() {
        let mut stack = UndoStack::default();
        let oldest = entry(0);
        assert!(stack.record(oldest.clone()).is_none());
        for n in 1..UndoStack::CAPACITY as u32 {
            assert!(stack.record(entry(n)).is_none());
        }
        let evicted = stack.record(entry(99));
        assert_eq!(evicted, Some(oldest));
        assert_eq!(stack.len(), UndoStack::CAPACITY);
    }

    #[test]
    fn inverse_round_trips_through_json() {
        let original = entry(7);
        let model_fields = ActiveModel::try_from(&original).unwrap();
        let model = Model {
            id: match model_fields.id {
                ActiveValue::Set(v) => v,
                _ => unreachable!(),
            },
            kind: match model_fields.kind {
                ActiveValue::Set(v) => v,
                _ => unreachable!(),
            },
            inverse: match model_fields.inverse {
                ActiveValue::Set(v) => v,
                _ => unreachable!(),
            },
            recorded_at: match model_fields.recorded_at {
                ActiveValue::Set(v) => v,
                _ => unreachable!(),
            },
        };
        assert_eq!(UndoEntry::try_from(model).unwrap(), original);
    }
}
