//! Batch import with duplicate detection.
//!
//! Candidate rows from an external source (bank export, spreadsheet) are
//! normalized and hashed into a content fingerprint; a row whose fingerprint
//! already exists anywhere in the store is rejected, everything else is
//! accepted. The lookup is a set membership test, so classification of a
//! batch is linear in its size rather than a pairwise scan of history.
//!
//! Semantic classification (merchant → category) is pluggable and best
//! effort: a row the rules cannot place is still accepted, just flagged
//! uncategorized. One bad row never aborts a batch.

use std::collections::HashSet;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::{Amount, TransactionKind};

/// A raw candidate transaction handed over by the import collaborator.
///
/// The amount is signed as the source reports it: negative means money out
/// (an expense), positive means money in (income).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRow {
    pub posted_date: NaiveDate,
    pub amount: Amount,
    pub counterparty: String,
}

impl CandidateRow {
    /// Content fingerprint over the normalized (date, amount, counterparty)
    /// triple. Stable across batches and runs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.posted_date.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.amount.minor().to_le_bytes());
        hasher.update(b"|");
        hasher.update(normalize(&self.counterparty).as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    pub fn kind(&self) -> TransactionKind {
        if self.amount.is_negative() {
            TransactionKind::Expense
        } else {
            TransactionKind::Income
        }
    }
}

/// NFKC, lowercase, collapsed whitespace. Two rows that differ only in
/// casing, accent encoding or spacing share a fingerprint.
pub(crate) fn normalize(text: &str) -> String {
    text.nfkc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Merchant classification supplied by a collaborator.
///
/// The deduplicator's own responsibility stops at fingerprinting and
/// duplicate rejection; how good the category guesses are is the rule set's
/// problem.
pub trait ClassifyRules {
    fn classify(&self, counterparty: &str) -> Option<Classification>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub tags: Vec<String>,
}

/// Substring rules in the shape the surrounding app learns them: a
/// normalized merchant pattern maps to a classification, and a pattern
/// matches when either string contains the other.
#[derive(Clone, Debug, Default)]
pub struct SubstringRules {
    rules: Vec<(String, Classification)>,
}

impl SubstringRules {
    pub fn new(rules: impl IntoIterator<Item = (String, Classification)>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|(pattern, classification)| (normalize(&pattern), classification))
                .collect(),
        }
    }
}

impl ClassifyRules for SubstringRules {
    fn classify(&self, counterparty: &str) -> Option<Classification> {
        let normalized = normalize(counterparty);
        self.rules
            .iter()
            .find(|(pattern, _)| normalized.contains(pattern) || pattern.contains(&normalized))
            .map(|(_, classification)| classification.clone())
    }
}

/// No rules: everything comes back uncategorized.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRules;

impl ClassifyRules for NoRules {
    fn classify(&self, _counterparty: &str) -> Option<Classification> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The fingerprint already exists in the store or earlier in this batch.
    Duplicate,
    /// A zero amount is neither income nor expense and cannot be posted.
    ZeroAmount,
}

/// An accepted row, classified and fingerprinted, ready to post.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptedRow {
    pub row: CandidateRow,
    pub fingerprint: String,
    pub kind: TransactionKind,
    pub category: Option<String>,
    pub tags: Vec<String>,
    /// Set when category inference failed; the row is accepted anyway so
    /// ingestion stays complete.
    pub uncategorized: bool,
}

/// Per-row outcome of classifying one batch.
#[derive(Clone, Debug, Default)]
pub struct ImportReport {
    pub accepted: Vec<AcceptedRow>,
    pub rejected: Vec<(CandidateRow, RejectReason)>,
}

/// Classify a batch against the set of already-known fingerprints.
///
/// Pure: no state is touched. Rows earlier in the batch count as "known" for
/// rows later in it, so a batch with an internal repeat accepts it once.
pub fn classify(
    rows: Vec<CandidateRow>,
    known_fingerprints: &HashSet<String>,
    rules: &dyn ClassifyRules,
) -> ImportReport {
    let mut report = ImportReport::default();
    let mut seen: HashSet<String> = HashSet::new();

    for row in rows {
        if row.amount.is_zero() {
            report.rejected.push((row, RejectReason::ZeroAmount));
            continue;
        }
        let fingerprint = row.fingerprint();
        if known_fingerprints.contains(&fingerprint) || !seen.insert(fingerprint.clone()) {
            report.rejected.push((row, RejectReason::Duplicate));
            continue;
        }

        let classification = rules.classify(&row.counterparty);
        let uncategorized = classification.is_none();
        let (category, tags) = match classification {
            Some(c) => (Some(c.category), c.tags),
            None => (None, Vec::new()),
        };

        report.accepted.push(AcceptedRow {
            kind: row.kind(),
            fingerprint,
            row,
            category,
            tags,
            uncategorized,
        });
    }

    report
}

/// Audit record of one ingestion run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: Uuid,
    pub imported_at: DateTime<Utc>,
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "import_batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub imported_at: DateTimeUtc,
    pub total: i64,
    pub accepted: i64,
    pub rejected: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&ImportBatch> for ActiveModel {
    fn from(batch: &ImportBatch) -> Self {
        Self {
            id: ActiveValue::Set(batch.id.to_string()),
            imported_at: ActiveValue::Set(batch.imported_at),
            total: ActiveValue::Set(batch.total as i64),
            accepted: ActiveValue::Set(batch.accepted as i64),
            rejected: ActiveValue::Set(batch.rejected as i64),
        }
    }
}

/// Fingerprint ownership rows, the O(1) duplicate lookup's durable form.
pub mod fingerprint_rows {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "import_fingerprints")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub fingerprint: String,
        pub transaction_id: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(date: (i32, u32, u32), amount: i64, counterparty: &str) -> CandidateRow {
        CandidateRow {
            posted_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            amount: Amount::new(amount),
            counterparty: counterparty.to_string(),
        }
    }

    #[test]
    fn normalization_is_case_space_and_accent_insensitive() {
        assert_eq!(normalize("  CAFÉ   Central "), normalize("café central"));
        assert_eq!(
            row((2026, 1, 5), -500, "MERCADONA  VALENCIA").fingerprint(),
            row((2026, 1, 5), -500, "mercadona valencia").fingerprint()
        );
    }

    #[test]
    fn different_content_different_fingerprint() {
        let base = row((2026, 1, 5), -500, "mercadona");
        assert_ne!(
            base.fingerprint(),
            row((2026, 1, 6), -500, "mercadona").fingerprint()
        );
        assert_ne!(
            base.fingerprint(),
            row((2026, 1, 5), -501, "mercadona").fingerprint()
        );
    }

    #[test]
    fn known_fingerprint_rejected_as_duplicate() {
        let first = row((2026, 1, 5), -500, "mercadona");
        let known: HashSet<String> = HashSet::from([first.fingerprint()]);

        let report = classify(
            vec![first.clone(), row((2026, 1, 6), -800, "amazon")],
            &known,
            &NoRules,
        );
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.rejected, vec![(first, RejectReason::Duplicate)]);
    }

    #[test]
    fn repeat_within_batch_accepted_once() {
        let repeated = row((2026, 1, 5), -500, "mercadona");
        let report = classify(
            vec![repeated.clone(), repeated.clone()],
            &HashSet::new(),
            &NoRules,
        );
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.rejected.len(), 1);
    }

    #[test]
    fn unclassified_rows_accepted_uncategorized() {
        let rules = SubstringRules::new([(
            "mercadona".to_string(),
            Classification {
                category: "groceries".to_string(),
                tags: vec!["food".to_string()],
            },
        )]);

        let report = classify(
            vec![
                row((2026, 1, 5), -500, "MERCADONA VALENCIA"),
                row((2026, 1, 6), -900, "totally unknown merchant"),
            ],
            &HashSet::new(),
            &rules,
        );

        assert_eq!(report.accepted[0].category.as_deref(), Some("groceries"));
        assert!(!report.accepted[0].uncategorized);
        assert!(report.accepted[1].category.is_none());
        assert!(report.accepted[1].uncategorized);
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn zero_amount_rejected_without_affecting_other_rows() {
        let report = classify(
            vec![
                row((2026, 1, 5), -1250, "supermarket"),
                row((2026, 1, 5), 0, "card check"),
            ],
            &HashSet::new(),
            &NoRules,
        );
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].1, RejectReason::ZeroAmount);
    }

    #[test]
    fn sign_decides_kind() {
        assert_eq!(row((2026, 1, 5), -500, "x").kind(), TransactionKind::Expense);
        assert_eq!(row((2026, 1, 5), 500, "x").kind(), TransactionKind::Income);
    }
}
