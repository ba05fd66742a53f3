//! Budget group allocation (50/30/20-style splits).
//!
//! The configuration layer owns the menu of groups; the engine only checks
//! that a committed split is well formed: integer percentages that sum to
//! exactly 100. On mismatch the validator proposes a deterministic
//! correction so the fix is reproducible and auditable.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{EngineError, ResultEngine};

/// One labeled budget group, e.g. ("needs", 50).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetGroup {
    pub label: String,
    pub percent: u32,
}

impl BudgetGroup {
    pub fn new(label: impl Into<String>, percent: u32) -> Self {
        Self {
            label: label.into(),
            percent,
        }
    }
}

/// Validate a candidate split.
///
/// Every percent is non-negative by construction (`u32`); the sum must equal
/// 100 exactly, no tolerance. The error message carries the signed deficit
/// and the proposed correction.
pub fn validate(groups: &[BudgetGroup]) -> ResultEngine<()> {
    if groups.is_empty() {
        return Err(EngineError::Validation(
            "budget split needs at least one group".to_string(),
        ));
    }
    for window in groups.windows(2) {
        if groups.iter().filter(|g| g.label == window[0].label).count() > 1 {
            return Err(EngineError::ExistingKey(window[0].label.clone()));
        }
    }

    let total: u32 = groups.iter().map(|g| g.percent).sum();
    if total == 100 {
        return Ok(());
    }

    let deficit = 100i64 - i64::from(total);
    let corrected = autocorrect(groups);
    let rendered: Vec<String> = corrected
        .iter()
        .map(|g| format!("{} {}", g.label, g.percent))
        .collect();
    Err(EngineError::Validation(format!(
        "budget split sums to {total}, deficit {deficit}; suggested: {}",
        rendered.join(", ")
    )))
}

/// Deterministic correction: the whole deficit (or surplus) lands on the
/// largest share; among equal largest shares the lexicographically lowest
/// label wins. `{50, 30, 19}` becomes `{51, 30, 19}`.
pub fn autocorrect(groups: &[BudgetGroup]) -> Vec<BudgetGroup> {
    let total: i64 = groups.iter().map(|g| i64::from(g.percent)).sum();
    let deficit = 100 - total;

    let largest = groups
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| b.percent.cmp(&a.percent).then(a.label.cmp(&b.label)))
        .map(|(index, _)| index);

    let mut corrected = groups.to_vec();
    if let Some(index) = largest {
        let adjusted = i64::from(corrected[index].percent) + deficit;
        // A surplus larger than the biggest share would push it below zero;
        // clamp there and leave the remainder unresolved for the caller.
        corrected[index].percent = u32::try_from(adjusted.max(0)).unwrap_or(0);
    }
    corrected
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "budget_groups")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub label: String,
    pub percent: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for BudgetGroup {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let percent = u32::try_from(model.percent)
            .map_err(|_| EngineError::Validation("negative stored percent".to_string()))?;
        Ok(Self {
            label: model.label,
            percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(groups: &[(&str, u32)]) -> Vec<BudgetGroup> {
        groups
            .iter()
            .map(|(label, percent)| BudgetGroup::new(*label, *percent))
            .collect()
    }

    #[test]
    fn exact_hundred_passes() {
        assert!(validate(&split(&[("needs", 50), ("wants", 30), ("savings", 20)])).is_ok());
    }

    #[test]
    fn deficit_of_one_reported_and_corrected_to_largest() {
        let groups = split(&[("needs", 50), ("wants", 30), ("savings", 19)]);
        let err = validate(&groups).unwrap_err();
        assert!(err.to_string().contains("deficit 1"));

        let corrected = autocorrect(&groups);
        assert_eq!(
            corrected,
            split(&[("needs", 51), ("wants", 30), ("savings", 19)])
        );
    }

    #[test]
    fn tie_breaks_on_lowest_label() {
        let groups = split(&[("wants", 40), ("needs", 40), ("savings", 19)]);
        let corrected = autocorrect(&groups);
        // "needs" < "wants" lexicographically, so it takes the extra point.
        assert_eq!(
            corrected,
            split(&[("wants", 40), ("needs", 41), ("savings", 19)])
        );
    }

    #[test]
    fn surplus_is_subtracted_from_largest() {
        let groups = split(&[("needs", 60), ("wants", 30), ("savings", 15)]);
        let corrected = autocorrect(&groups);
        assert_eq!(
            corrected,
            split(&[("needs", 55), ("wants", 30), ("savings", 15)])
        );
        let total: u32 = corrected.iter().map(|g| g.percent).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn duplicate_labels_rejected() {
        let groups = split(&[("needs", 50), ("needs", 50)]);
        assert_eq!(
            validate(&groups),
            Err(EngineError::ExistingKey("needs".to_string()))
        );
    }
}
