//! Initial schema migration - creates all tables from scratch.
//!
//! The complete schema for Quaderno:
//!
//! - `accounts`: money locations; balances are always derived, never stored
//! - `transactions`: the append-oriented ledger, tombstones included
//! - `envelopes`: budget buckets bound to a category or a tag
//! - `envelope_allocations`: per-month allocation overrides
//! - `envelope_rollovers`: stored balances of closed months
//! - `goals`: savings targets
//! - `budget_groups`: validated budget split percentages
//! - `recurring_templates`: fixed monthly charges materialized on demand
//! - `recurring_runs`: months already materialized per template
//! - `import_batches`: audit rows for batch ingestion runs
//! - `import_fingerprints`: duplicate-detection fingerprints of live rows
//! - `undo_log`: persisted inverse operations, bounded by the engine

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
enum Accounts {
    Table,
    Id,
    Name,
    Archived,
    CreatedAt,
}

#[derive(Iden)]
enum Transactions {
    Table,
    Id,
    Seq,
    PostedDate,
    Kind,
    AmountMinor,
    Category,
    Tags,
    Description,
    AccountFrom,
    AccountTo,
    Source,
    Fingerprint,
    CreatedAt,
    VoidedAt,
    Replaces,
}

#[derive(Iden)]
enum Envelopes {
    Table,
    Id,
    Name,
    BindKind,
    BindValue,
    AllocationMinor,
    RolloverMinor,
    Disabled,
    CreatedAt,
}

#[derive(Iden)]
enum EnvelopeAllocations {
    Table,
    EnvelopeId,
    Month,
    AmountMinor,
}

#[derive(Iden)]
enum EnvelopeRollovers {
    Table,
    EnvelopeId,
    Month,
    BalanceMinor,
}

#[derive(Iden)]
enum Goals {
    Table,
    Id,
    Name,
    ScopeKind,
    ScopeValue,
    TargetMinor,
    Status,
    CreatedAt,
}

#[derive(Iden)]
enum RecurringTemplates {
    Table,
    Id,
    Name,
    AmountMinor,
    DayOfMonth,
    AccountId,
    Category,
    Active,
    CreatedAt,
}

#[derive(Iden)]
enum RecurringRuns {
    Table,
    TemplateId,
    Month,
}

#[derive(Iden)]
enum BudgetGroups {
    Table,
    Label,
    Percent,
}

#[derive(Iden)]
enum ImportBatches {
    Table,
    Id,
    ImportedAt,
    Total,
    Accepted,
    Rejected,
}

#[derive(Iden)]
enum ImportFingerprints {
    Table,
    Fingerprint,
    TransactionId,
}

#[derive(Iden)]
enum UndoLog {
    Table,
    Id,
    Kind,
    Inverse,
    RecordedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Accounts
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Accounts::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Accounts::Name).string().not_null())
                    .col(ColumnDef::new(Accounts::Archived).boolean().not_null())
                    .col(ColumnDef::new(Accounts::CreatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-accounts-name-unique")
                    .table(Accounts::Table)
                    .col(Accounts::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. Transactions
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Transactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transactions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Transactions::Seq).big_integer().not_null())
                    .col(ColumnDef::new(Transactions::PostedDate).date().not_null())
                    .col(ColumnDef::new(Transactions::Kind).string().not_null())
                    .col(
                        ColumnDef::new(Transactions::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::Category).string())
                    .col(ColumnDef::new(Transactions::Tags).string().not_null())
                    .col(
                        ColumnDef::new(Transactions::Description)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::AccountFrom).string())
                    .col(ColumnDef::new(Transactions::AccountTo).string())
                    .col(ColumnDef::new(Transactions::Source).string().not_null())
                    .col(ColumnDef::new(Transactions::Fingerprint).string())
                    .col(
                        ColumnDef::new(Transactions::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::VoidedAt).timestamp())
                    .col(ColumnDef::new(Transactions::Replaces).string())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transactions-account_from")
                            .from(Transactions::Table, Transactions::AccountFrom)
                            .to(Accounts::Table, Accounts::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transactions-account_to")
                            .from(Transactions::Table, Transactions::AccountTo)
                            .to(Accounts::Table, Accounts::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transactions-seq-unique")
                    .table(Transactions::Table)
                    .col(Transactions::Seq)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 3. Envelopes
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Envelopes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Envelopes::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Envelopes::Name).string().not_null())
                    .col(ColumnDef::new(Envelopes::BindKind).string().not_null())
                    .col(ColumnDef::new(Envelopes::BindValue).string().not_null())
                    .col(
                        ColumnDef::new(Envelopes::AllocationMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Envelopes::RolloverMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Envelopes::Disabled).boolean().not_null())
                    .col(ColumnDef::new(Envelopes::CreatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-envelopes-name-unique")
                    .table(Envelopes::Table)
                    .col(Envelopes::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 4. Envelope allocations and rollovers
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(EnvelopeAllocations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EnvelopeAllocations::EnvelopeId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EnvelopeAllocations::Month)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EnvelopeAllocations::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(EnvelopeAllocations::EnvelopeId)
                            .col(EnvelopeAllocations::Month),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-envelope_allocations-envelope_id")
                            .from(EnvelopeAllocations::Table, EnvelopeAllocations::EnvelopeId)
                            .to(Envelopes::Table, Envelopes::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(EnvelopeRollovers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EnvelopeRollovers::EnvelopeId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(EnvelopeRollovers::Month).string().not_null())
                    .col(
                        ColumnDef::new(EnvelopeRollovers::BalanceMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(EnvelopeRollovers::EnvelopeId)
                            .col(EnvelopeRollovers::Month),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-envelope_rollovers-envelope_id")
                            .from(EnvelopeRollovers::Table, EnvelopeRollovers::EnvelopeId)
                            .to(Envelopes::Table, Envelopes::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 5. Goals
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Goals::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Goals::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Goals::Name).string().not_null())
                    .col(ColumnDef::new(Goals::ScopeKind).string().not_null())
                    .col(ColumnDef::new(Goals::ScopeValue).string())
                    .col(ColumnDef::new(Goals::TargetMinor).big_integer().not_null())
                    .col(ColumnDef::new(Goals::Status).string().not_null())
                    .col(ColumnDef::new(Goals::CreatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 6. Recurring templates and runs
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(RecurringTemplates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RecurringTemplates::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RecurringTemplates::Name).string().not_null())
                    .col(
                        ColumnDef::new(RecurringTemplates::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecurringTemplates::DayOfMonth)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecurringTemplates::AccountId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RecurringTemplates::Category).string())
                    .col(
                        ColumnDef::new(RecurringTemplates::Active)
                            .boolean()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecurringTemplates::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-recurring_templates-account_id")
                            .from(RecurringTemplates::Table, RecurringTemplates::AccountId)
                            .to(Accounts::Table, Accounts::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-recurring_templates-name-unique")
                    .table(RecurringTemplates::Table)
                    .col(RecurringTemplates::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RecurringRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RecurringRuns::TemplateId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RecurringRuns::Month).string().not_null())
                    .primary_key(
                        Index::create()
                            .col(RecurringRuns::TemplateId)
                            .col(RecurringRuns::Month),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-recurring_runs-template_id")
                            .from(RecurringRuns::Table, RecurringRuns::TemplateId)
                            .to(RecurringTemplates::Table, RecurringTemplates::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 7. Budget groups
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(BudgetGroups::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BudgetGroups::Label)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BudgetGroups::Percent).integer().not_null())
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 8. Import batches and fingerprints
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(ImportBatches::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ImportBatches::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ImportBatches::ImportedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ImportBatches::Total).big_integer().not_null())
                    .col(
                        ColumnDef::new(ImportBatches::Accepted)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ImportBatches::Rejected)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ImportFingerprints::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ImportFingerprints::Fingerprint)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ImportFingerprints::TransactionId)
                            .string()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-import_fingerprints-transaction_id")
                            .from(ImportFingerprints::Table, ImportFingerprints::TransactionId)
                            .to(Transactions::Table, Transactions::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 9. Undo log
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(UndoLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UndoLog::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UndoLog::Kind).string().not_null())
                    .col(ColumnDef::new(UndoLog::Inverse).string().not_null())
                    .col(ColumnDef::new(UndoLog::RecordedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Drop in reverse order of creation (respecting FK dependencies)
        manager
            .drop_table(Table::drop().table(UndoLog::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ImportFingerprints::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ImportBatches::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(BudgetGroups::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RecurringRuns::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RecurringTemplates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Goals::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EnvelopeRollovers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EnvelopeAllocations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Envelopes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Transactions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await?;

        Ok(())
    }
}
