//! Recurring expense templates.
//!
//! A template captures a fixed monthly charge (rent, a subscription) and is
//! materialized into a real expense on demand, once per month. Applied
//! months are recorded per template, so re-running a month creates nothing
//! new and a charge the user voids afterwards stays voided.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Amount, EngineError, Month, ResultEngine, util};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringTemplate {
    pub id: Uuid,
    pub name: String,
    pub amount: Amount,
    /// Day the charge lands on; clamped to the month's last day.
    pub day_of_month: u32,
    /// Account the charge settles against.
    pub account_id: Uuid,
    pub category: Option<String>,
    /// Inactive templates are kept but never materialized.
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl RecurringTemplate {
    pub fn new(
        name: String,
        amount: Amount,
        day_of_month: u32,
        account_id: Uuid,
        category: Option<String>,
        created_at: DateTime<Utc>,
    ) -> ResultEngine<Self> {
        if !amount.is_positive() {
            return Err(EngineError::Validation(
                "recurring amount must be > 0".to_string(),
            ));
        }
        if !(1..=31).contains(&day_of_month) {
            return Err(EngineError::Validation(
                "day of month must be between 1 and 31".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            amount,
            day_of_month,
            account_id,
            category,
            active: true,
            created_at,
        })
    }

    /// Posting date within `month`: the template's day, clamped to the
    /// month's last day so a day-31 charge still lands in February.
    pub fn due_date(&self, month: Month) -> NaiveDate {
        let last = month.last_day();
        let day = self.day_of_month.min(last.day());
        month.first_day().with_day(day).unwrap_or(last)
    }
}

/// Templates plus the months each one was already materialized for.
#[derive(Debug, Default)]
pub struct RecurringBook {
    templates: HashMap<Uuid, RecurringTemplate>,
    applied: HashSet<(Uuid, Month)>,
}

impl RecurringBook {
    pub fn insert(&mut self, template: RecurringTemplate) {
        self.templates.insert(template.id, template);
    }

    pub fn get(&self, template_id: Uuid) -> ResultEngine<&RecurringTemplate> {
        self.templates
            .get(&template_id)
            .ok_or_else(|| EngineError::KeyNotFound("recurring template not exists".to_string()))
    }

    pub(crate) fn get_mut(&mut self, template_id: Uuid) -> ResultEngine<&mut RecurringTemplate> {
        self.templates
            .get_mut(&template_id)
            .ok_or_else(|| EngineError::KeyNotFound("recurring template not exists".to_string()))
    }

    pub fn by_name(&self, name: &str) -> Option<&RecurringTemplate> {
        self.templates.values().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecurringTemplate> {
        self.templates.values()
    }

    pub fn is_applied(&self, template_id: Uuid, month: Month) -> bool {
        self.applied.contains(&(template_id, month))
    }

    pub(crate) fn mark_applied(&mut self, template_id: Uuid, month: Month) {
        self.applied.insert((template_id, month));
    }

    /// Active templates with no charge for `month` yet, in name order so a
    /// materialization run posts deterministically.
    pub fn due(&self, month: Month) -> Vec<Uuid> {
        let mut due: Vec<(&str, Uuid)> = self
            .templates
            .values()
            .filter(|t| t.active && !self.is_applied(t.id, month))
            .map(|t| (t.name.as_str(), t.id))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "recurring_templates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub amount_minor: i64,
    pub day_of_month: i32,
    pub account_id: String,
    pub category: Option<String>,
    pub active: bool,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&RecurringTemplate> for ActiveModel {
    fn from(template: &RecurringTemplate) -> Self {
        Self {
            id: ActiveValue::Set(template.id.to_string()),
            name: ActiveValue::Set(template.name.clone()),
            amount_minor: ActiveValue::Set(template.amount.minor()),
            day_of_month: ActiveValue::Set(template.day_of_month as i32),
            account_id: ActiveValue::Set(template.account_id.to_string()),
            category: ActiveValue::Set(template.category.clone()),
            active: ActiveValue::Set(template.active),
            created_at: ActiveValue::Set(template.created_at),
        }
    }
}

impl TryFrom<Model> for RecurringTemplate {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let day_of_month = u32::try_from(model.day_of_month)
            .map_err(|_| EngineError::Validation("negative stored day of month".to_string()))?;
        Ok(Self {
            id: util::parse_uuid(&model.id, "recurring template")?,
            name: model.name,
            amount: Amount::new(model.amount_minor),
            day_of_month,
            account_id: util::parse_uuid(&model.account_id, "account")?,
            category: model.category,
            active: model.active,
            created_at: model.created_at,
        })
    }
}

/// Months already materialized, the durable form of the applied set.
pub mod run_rows {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "recurring_runs")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub template_id: String,
        #[sea_orm(primary_key, auto_increment = false)]
        pub month: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(day: u32) -> RecurringTemplate {
        RecurringTemplate::new(
            "Rent".to_string(),
            Amount::new(900_00),
            day,
            Uuid::new_v4(),
            Some("housing".to_string()),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn due_date_clamps_to_month_end() {
        let rent = template(31);
        let february = Month::new(2026, 2).unwrap();
        assert_eq!(
            rent.due_date(february),
            NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()
        );
        let january = Month::new(2026, 1).unwrap();
        assert_eq!(
            rent.due_date(january),
            NaiveDate::from_ymd_opt(2026, 1, 31).unwrap()
        );
    }

    #[test]
    fn rejects_bad_amount_and_day() {
        let account = Uuid::new_v4();
        assert!(
            RecurringTemplate::new(
                "x".to_string(),
                Amount::ZERO,
                1,
                account,
                None,
                Utc::now()
            )
            .is_err()
        );
        assert!(
            RecurringTemplate::new(
                "x".to_string(),
                Amount::new(100),
                32,
                account,
                None,
                Utc::now()
            )
            .is_err()
        );
    }

    #[test]
    fn due_skips_applied_and_inactive() {
        let mut book = RecurringBook::default();
        let rent = template(1);
        let mut gym = template(5);
        gym.name = "Gym".to_string();
        gym.active = false;
        let rent_id = rent.id;
        book.insert(rent);
        book.insert(gym);

        let january = Month::new(2026, 1).unwrap();
        assert_eq!(book.due(january), vec![rent_id]);
        book.mark_applied(rent_id, january);
        assert!(book.due(january).is_empty());
    }
}
