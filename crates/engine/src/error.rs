//! Errors the engine can return.
//!
//! Structural errors ([`Validation`], [`KeyNotFound`], [`ExistingKey`]) are
//! rejected before any state change. [`ConsistencyFault`] is surfaced, never
//! silently repaired. [`DuplicateImport`] is reported per row and never
//! aborts a batch. [`NothingToUndo`] is a benign condition.
//!
//! [`Validation`]: EngineError::Validation
//! [`KeyNotFound`]: EngineError::KeyNotFound
//! [`ExistingKey`]: EngineError::ExistingKey
//! [`ConsistencyFault`]: EngineError::ConsistencyFault
//! [`DuplicateImport`]: EngineError::DuplicateImport
//! [`NothingToUndo`]: EngineError::NothingToUndo
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

use crate::Amount;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid mutation request: {0}")]
    Validation(String),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error(
        "Balance drift on account {account_id}: incremental {incremental}, recomputed {recomputed}"
    )]
    ConsistencyFault {
        account_id: Uuid,
        incremental: Amount,
        /// The from-scratch value; it is adopted as the safe fallback.
        recomputed: Amount,
    },
    #[error("Duplicate import fingerprint: {0}")]
    DuplicateImport(String),
    #[error("Nothing to undo")]
    NothingToUndo,
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (
                Self::ConsistencyFault {
                    account_id: a,
                    incremental: ai,
                    recomputed: ar,
                },
                Self::ConsistencyFault {
                    account_id: b,
                    incremental: bi,
                    recomputed: br,
                },
            ) => a == b && ai == bi && ar == br,
            (Self::DuplicateImport(a), Self::DuplicateImport(b)) => a == b,
            (Self::NothingToUndo, Self::NothingToUndo) => true,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
