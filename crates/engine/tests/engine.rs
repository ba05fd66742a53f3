use chrono::NaiveDate;
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

use engine::{
    Amount, BudgetGroup, Engine, EngineError, EnvelopeBinding, GoalScope, GoalStatus, Month,
    TransactionDraft, TransactionKind,
};
use migration::MigratorTrait;

async fn engine_with_db() -> (Engine, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder()
        .database(db.clone())
        .build()
        .await
        .unwrap();
    (engine, db)
}

async fn engine_with_file_db() -> (Engine, String, std::path::PathBuf) {
    let root =
        std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target/test_dbs");
    std::fs::create_dir_all(&root).unwrap();

    let path = root.join(format!("engine_{}.db", Uuid::new_v4()));
    let url = format!("sqlite:{}?mode=rwc", path.display());

    let db = Database::connect(&url).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder().database(db).build().await.unwrap();
    (engine, url, path)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn income(account: Uuid, minor: i64) -> TransactionDraft {
    TransactionDraft::manual(
        date(2026, 1, 10),
        TransactionKind::Income,
        Amount::new(minor),
        "salary".to_string(),
        None,
        Some(account),
    )
}

fn expense(account: Uuid, minor: i64, tag: &str) -> TransactionDraft {
    TransactionDraft::manual(
        date(2026, 1, 15),
        TransactionKind::Expense,
        Amount::new(minor),
        "lunch".to_string(),
        Some(account),
        None,
    )
    .with_tags([tag.to_string()])
}

#[tokio::test]
async fn post_income_and_expense_derives_balance() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();

    engine.post(income(checking, 1000_00)).await.unwrap();
    engine.post(expense(checking, 200_00, "food")).await.unwrap();

    assert_eq!(engine.balance(checking).unwrap(), Amount::new(800_00));
}

#[tokio::test]
async fn transfer_conserves_total_across_accounts() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    let savings = engine.new_account("Savings").await.unwrap();
    engine.post(income(checking, 500_00)).await.unwrap();

    engine
        .post(TransactionDraft::manual(
            date(2026, 1, 20),
            TransactionKind::Transfer,
            Amount::new(300_00),
            "monthly saving".to_string(),
            Some(checking),
            Some(savings),
        ))
        .await
        .unwrap();

    assert_eq!(engine.balance(checking).unwrap(), Amount::new(200_00));
    assert_eq!(engine.balance(savings).unwrap(), Amount::new(300_00));
    let total = engine.balance(checking).unwrap() + engine.balance(savings).unwrap();
    assert_eq!(total, Amount::new(500_00));
}

#[tokio::test]
async fn transfer_requires_two_distinct_accounts() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();

    let same_side = TransactionDraft::manual(
        date(2026, 1, 20),
        TransactionKind::Transfer,
        Amount::new(10_00),
        "noop".to_string(),
        Some(checking),
        Some(checking),
    );
    assert!(matches!(
        engine.post(same_side).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn void_reverts_balance_but_keeps_audit_row() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    engine.post(income(checking, 1000_00)).await.unwrap();
    let tx_id = engine.post(expense(checking, 150_00, "food")).await.unwrap();

    engine.void(tx_id).await.unwrap();

    assert_eq!(engine.balance(checking).unwrap(), Amount::new(1000_00));
    assert!(engine.transaction(tx_id).unwrap().is_voided());
    assert!(engine.export_rows().all(|tx| tx.id != tx_id));
}

#[tokio::test]
async fn void_twice_is_rejected() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    let tx_id = engine.post(income(checking, 100_00)).await.unwrap();

    engine.void(tx_id).await.unwrap();
    assert!(matches!(
        engine.void(tx_id).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn amend_replaces_content_in_one_event() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    engine.post(income(checking, 1000_00)).await.unwrap();
    let tx_id = engine.post(expense(checking, 150_00, "food")).await.unwrap();
    let cursor = engine.events_since(0).last().unwrap().seq;

    let mut corrected = engine.transaction(tx_id).unwrap().to_draft();
    corrected.amount = Amount::new(15_00);
    let new_id = engine.amend(tx_id, corrected).await.unwrap();

    assert_eq!(engine.balance(checking).unwrap(), Amount::new(985_00));
    assert!(engine.transaction(tx_id).unwrap().is_voided());
    assert_eq!(engine.transaction(new_id).unwrap().replaces, Some(tx_id));
    // The edit is one logical event, not a void plus a post.
    assert_eq!(engine.events_since(cursor).len(), 1);
}

#[tokio::test]
async fn undo_restores_balance_after_post() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    engine.post(income(checking, 1000_00)).await.unwrap();
    engine.post(expense(checking, 100_00, "food")).await.unwrap();
    assert_eq!(engine.balance(checking).unwrap(), Amount::new(900_00));

    engine.undo().await.unwrap();

    assert_eq!(engine.balance(checking).unwrap(), Amount::new(1000_00));
}

#[tokio::test]
async fn undo_of_void_reposts_equivalent_transaction() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    engine.post(income(checking, 1000_00)).await.unwrap();
    let tx_id = engine.post(expense(checking, 100_00, "food")).await.unwrap();

    engine.void(tx_id).await.unwrap();
    engine.undo().await.unwrap();

    assert_eq!(engine.balance(checking).unwrap(), Amount::new(900_00));
    // Compensation posts a new row; the tombstone stays.
    assert!(engine.transaction(tx_id).unwrap().is_voided());
    assert_eq!(engine.export_rows().count(), 2);
}

#[tokio::test]
async fn undo_on_empty_stack_reports_nothing_to_undo() {
    let (mut engine, _db) = engine_with_db().await;
    assert_eq!(engine.undo().await, Err(EngineError::NothingToUndo));
}

#[tokio::test]
async fn undo_stack_keeps_at_most_ten_entries() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    for _ in 0..12 {
        engine.post(income(checking, 1_00)).await.unwrap();
    }
    assert_eq!(engine.undo_depth(), 10);

    for _ in 0..10 {
        engine.undo().await.unwrap();
    }
    assert_eq!(engine.undo().await, Err(EngineError::NothingToUndo));
    // The two oldest posts survived the eviction.
    assert_eq!(engine.balance(checking).unwrap(), Amount::new(2_00));
}

#[tokio::test]
async fn envelope_rollover_carries_unspent_allocation() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    let groceries = engine
        .new_envelope(
            "Groceries",
            EnvelopeBinding::Tag("groceries".to_string()),
            Amount::new(200_00),
            Amount::new(20_00),
        )
        .await
        .unwrap();

    let mut draft = expense(checking, 50_00, "groceries");
    draft.posted_date = date(2020, 1, 7);
    engine.post(draft).await.unwrap();

    let january = Month::new(2020, 1).unwrap();
    let balance = engine.rollover(groceries, january).await.unwrap();
    assert_eq!(balance, Amount::new(170_00));

    // Replaying the same close is a no-op read.
    let again = engine.rollover(groceries, january).await.unwrap();
    assert_eq!(again, Amount::new(170_00));
    assert_eq!(
        engine.envelope(groceries).unwrap().rollover_balance,
        Amount::new(170_00)
    );
}

#[tokio::test]
async fn allocation_override_and_undo() {
    let (mut engine, _db) = engine_with_db().await;
    let groceries = engine
        .new_envelope(
            "Groceries",
            EnvelopeBinding::Tag("groceries".to_string()),
            Amount::new(200_00),
            Amount::ZERO,
        )
        .await
        .unwrap();
    let march = Month::new(2026, 3).unwrap();

    engine
        .allocate(groceries, march, Amount::new(350_00))
        .await
        .unwrap();
    assert_eq!(
        engine.allocation(groceries, march).unwrap(),
        Amount::new(350_00)
    );

    engine.undo().await.unwrap();
    // Back to the envelope default.
    assert_eq!(
        engine.allocation(groceries, march).unwrap(),
        Amount::new(200_00)
    );
}

#[tokio::test]
async fn goal_achieves_once_and_never_reverts() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    let goal_id = engine
        .new_goal("Cushion", GoalScope::Global, Amount::new(500_00))
        .await
        .unwrap();

    // Only transactions dated on or after the goal's creation day count.
    let today = chrono::Utc::now().date_naive();
    let mut salary = income(checking, 600_00);
    salary.posted_date = today;
    engine.post(salary).await.unwrap();
    assert_eq!(engine.progress(goal_id).unwrap().status, GoalStatus::Achieved);

    // Spending below the target afterwards does not demote the goal.
    let mut lunch = expense(checking, 400_00, "food");
    lunch.posted_date = today;
    engine.post(lunch).await.unwrap();
    let progress = engine.progress(goal_id).unwrap();
    assert_eq!(progress.status, GoalStatus::Achieved);
    assert_eq!(progress.current, Amount::new(200_00));
}

#[tokio::test]
async fn budget_split_must_sum_to_one_hundred() {
    let (mut engine, _db) = engine_with_db().await;

    let wrong = vec![
        BudgetGroup::new("needs", 50),
        BudgetGroup::new("wants", 30),
        BudgetGroup::new("savings", 19),
    ];
    assert!(matches!(
        engine.set_budget_split(wrong).await,
        Err(EngineError::Validation(_))
    ));
    assert!(engine.budget_split().is_empty());

    let right = vec![
        BudgetGroup::new("needs", 50),
        BudgetGroup::new("wants", 30),
        BudgetGroup::new("savings", 20),
    ];
    engine.set_budget_split(right.clone()).await.unwrap();
    assert_eq!(engine.budget_split(), right.as_slice());
}

#[tokio::test]
async fn balance_as_of_ignores_later_transactions() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    engine.post(income(checking, 1000_00)).await.unwrap();
    engine.post(expense(checking, 200_00, "food")).await.unwrap();

    // Income on the 10th, expense on the 15th.
    assert_eq!(
        engine.balance_as_of(checking, date(2026, 1, 12)).unwrap(),
        Amount::new(1000_00)
    );
    assert_eq!(
        engine.balance_as_of(checking, date(2026, 1, 31)).unwrap(),
        Amount::new(800_00)
    );
}

#[tokio::test]
async fn archived_account_rejects_new_postings() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    engine.post(income(checking, 100_00)).await.unwrap();

    engine.archive_account(checking).await.unwrap();

    assert!(matches!(
        engine.post(income(checking, 1_00)).await,
        Err(EngineError::Validation(_))
    ));
    // History stays readable.
    assert_eq!(engine.balance(checking).unwrap(), Amount::new(100_00));
}

#[tokio::test]
async fn state_survives_restart() {
    let (mut engine, url, path) = engine_with_file_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    engine.post(income(checking, 1000_00)).await.unwrap();
    engine.post(expense(checking, 250_00, "food")).await.unwrap();
    let groceries = engine
        .new_envelope(
            "Groceries",
            EnvelopeBinding::Tag("food".to_string()),
            Amount::new(300_00),
            Amount::ZERO,
        )
        .await
        .unwrap();
    engine
        .allocate(groceries, Month::new(2026, 1).unwrap(), Amount::new(400_00))
        .await
        .unwrap();
    drop(engine);

    let db = Database::connect(&url).await.unwrap();
    let mut reloaded = Engine::builder().database(db).build().await.unwrap();

    assert_eq!(reloaded.balance(checking).unwrap(), Amount::new(750_00));
    assert_eq!(
        reloaded
            .allocation(groceries, Month::new(2026, 1).unwrap())
            .unwrap(),
        Amount::new(400_00)
    );
    // The undo stack was persisted too: reverting the allocation still works.
    reloaded.undo().await.unwrap();
    assert_eq!(
        reloaded
            .allocation(groceries, Month::new(2026, 1).unwrap())
            .unwrap(),
        Amount::new(300_00)
    );

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn voiding_an_expense_can_achieve_a_goal() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    let goal_id = engine
        .new_goal("Cushion", GoalScope::Global, Amount::new(500_00))
        .await
        .unwrap();

    let today = chrono::Utc::now().date_naive();
    let mut lunch = expense(checking, 200_00, "food");
    lunch.posted_date = today;
    let lunch_id = engine.post(lunch).await.unwrap();
    let mut salary = income(checking, 600_00);
    salary.posted_date = today;
    engine.post(salary).await.unwrap();

    // Net 400 of 500: still active.
    assert_eq!(engine.progress(goal_id).unwrap().status, GoalStatus::Active);

    // Removing the expense lifts the net to 600 and must flip the status.
    engine.void(lunch_id).await.unwrap();
    let progress = engine.progress(goal_id).unwrap();
    assert_eq!(progress.current, Amount::new(600_00));
    assert_eq!(progress.status, GoalStatus::Achieved);
}

#[tokio::test]
async fn failed_undo_keeps_the_entry() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();

    let salary_id = engine.post(income(checking, 100_00)).await.unwrap();
    engine.void(salary_id).await.unwrap();

    // Reverting the void reposts an equivalent transaction.
    engine.undo().await.unwrap();
    assert_eq!(engine.balance(checking).unwrap(), Amount::new(100_00));
    assert_eq!(engine.undo_depth(), 1);

    // The remaining entry targets the original transaction, which is still
    // voided; applying it fails and must not consume the entry.
    assert!(matches!(
        engine.undo().await,
        Err(EngineError::Validation(_))
    ));
    assert_eq!(engine.undo_depth(), 1);
    assert!(matches!(
        engine.undo().await,
        Err(EngineError::Validation(_))
    ));
    assert_eq!(engine.balance(checking).unwrap(), Amount::new(100_00));
}

#[tokio::test]
async fn recurring_charge_posts_once_per_month() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    engine.post(income(checking, 2000_00)).await.unwrap();
    engine
        .new_recurring(
            "Rent",
            Amount::new(900_00),
            1,
            checking,
            Some("housing".to_string()),
        )
        .await
        .unwrap();

    let january = Month::new(2026, 1).unwrap();
    let created = engine.apply_recurring(january).await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(engine.balance(checking).unwrap(), Amount::new(1100_00));

    let rent = engine.transaction(created[0]).unwrap();
    assert_eq!(rent.posted_date, date(2026, 1, 1));
    assert_eq!(rent.category.as_deref(), Some("housing"));

    // A repeated run for the same month creates nothing.
    assert!(engine.apply_recurring(january).await.unwrap().is_empty());
    assert_eq!(engine.balance(checking).unwrap(), Amount::new(1100_00));
}

#[tokio::test]
async fn paused_recurring_is_skipped_until_resumed() {
    let (mut engine, _db) = engine_with_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    engine.post(income(checking, 500_00)).await.unwrap();
    let gym = engine
        .new_recurring("Gym", Amount::new(40_00), 5, checking, None)
        .await
        .unwrap();

    let january = Month::new(2026, 1).unwrap();
    engine.set_recurring_active(gym, false).await.unwrap();
    assert!(engine.apply_recurring(january).await.unwrap().is_empty());

    engine.set_recurring_active(gym, true).await.unwrap();
    assert_eq!(engine.apply_recurring(january).await.unwrap().len(), 1);
    assert_eq!(engine.balance(checking).unwrap(), Amount::new(460_00));
}

#[tokio::test]
async fn recurring_runs_survive_restart() {
    let (mut engine, url, path) = engine_with_file_db().await;
    let checking = engine.new_account("Checking").await.unwrap();
    engine.post(income(checking, 2000_00)).await.unwrap();
    engine
        .new_recurring("Rent", Amount::new(900_00), 1, checking, None)
        .await
        .unwrap();
    let january = Month::new(2026, 1).unwrap();
    engine.apply_recurring(january).await.unwrap();
    drop(engine);

    let db = Database::connect(&url).await.unwrap();
    let mut reloaded = Engine::builder().database(db).build().await.unwrap();
    assert!(reloaded.apply_recurring(january).await.unwrap().is_empty());
    assert_eq!(reloaded.balance(checking).unwrap(), Amount::new(1100_00));

    std::fs::remove_file(path).ok();
}
