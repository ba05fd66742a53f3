use std::error::Error;

use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use engine::{
    Amount, BudgetGroup, CandidateRow, Classification, ClassifyRules, Engine, EngineError,
    EnvelopeBinding, GoalScope, Month, NoRules, SubstringRules, TransactionDraft, TransactionKind,
};
use migration::MigratorTrait;
use uuid::Uuid;

mod settings;

#[derive(Parser, Debug)]
#[command(name = "quaderno")]
#[command(about = "Personal ledger with envelope budgeting")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage accounts.
    Account(Account),
    /// Post a manual transaction.
    Post(PostArgs),
    /// Replace a transaction's content, keeping the original for audit.
    Amend(AmendArgs),
    /// Tombstone a transaction.
    Void(VoidArgs),
    /// Show an account's derived balance.
    Balance(BalanceArgs),
    /// Manage envelopes.
    Envelope(Envelope),
    /// Override one month's allocation for an envelope.
    Allocate(AllocateArgs),
    /// Close a month for an envelope and print the carried balance.
    Rollover(RolloverArgs),
    /// Manage savings goals.
    Goal(Goal),
    /// Manage recurring monthly charges.
    Recurring(Recurring),
    /// Manage the budget split percentages.
    Split(Split),
    /// Import a bank CSV export (date, amount, counterparty).
    Import(ImportArgs),
    /// Export the live ledger as CSV.
    Export(ExportArgs),
    /// Revert the most recent mutation.
    Undo,
}

#[derive(Args, Debug)]
struct Account {
    #[command(subcommand)]
    command: AccountCommand,
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    Create {
        #[arg(long)]
        name: String,
    },
    Archive {
        #[arg(long)]
        name: String,
    },
    List,
}

#[derive(Args, Debug)]
struct PostArgs {
    /// expense, income, transfer or investment.
    #[arg(long)]
    kind: String,
    /// Decimal amount, always positive, e.g. "12.50".
    #[arg(long)]
    amount: String,
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    description: String,
    /// Source account name (expense, transfer, investment).
    #[arg(long)]
    from: Option<String>,
    /// Destination account name (income, transfer).
    #[arg(long)]
    to: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
}

#[derive(Args, Debug)]
struct AmendArgs {
    #[arg(long)]
    id: Uuid,
    #[command(flatten)]
    content: PostArgs,
}

#[derive(Args, Debug)]
struct VoidArgs {
    #[arg(long)]
    id: Uuid,
}

#[derive(Args, Debug)]
struct BalanceArgs {
    #[arg(long)]
    account: String,
    /// Inclusive cut-off date; omitted means the live balance.
    #[arg(long)]
    as_of: Option<NaiveDate>,
}

#[derive(Args, Debug)]
struct Envelope {
    #[command(subcommand)]
    command: EnvelopeCommand,
}

#[derive(Subcommand, Debug)]
enum EnvelopeCommand {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        /// Default monthly allocation.
        #[arg(long)]
        allocation: String,
        /// Starting carried balance.
        #[arg(long, default_value = "0")]
        rollover: String,
    },
    Disable {
        #[arg(long)]
        name: String,
    },
    List,
}

#[derive(Args, Debug)]
struct AllocateArgs {
    #[arg(long)]
    envelope: String,
    /// Month as YYYY-MM.
    #[arg(long)]
    month: String,
    #[arg(long)]
    amount: String,
}

#[derive(Args, Debug)]
struct RolloverArgs {
    #[arg(long)]
    envelope: String,
    #[arg(long)]
    month: String,
    /// Close the month even if the wall clock has not passed it.
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct Goal {
    #[command(subcommand)]
    command: GoalCommand,
}

#[derive(Subcommand, Debug)]
enum GoalCommand {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        target: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },
    Progress {
        #[arg(long)]
        name: String,
    },
    Abandon {
        #[arg(long)]
        name: String,
    },
    List,
}

#[derive(Args, Debug)]
struct Recurring {
    #[command(subcommand)]
    command: RecurringCommand,
}

#[derive(Subcommand, Debug)]
enum RecurringCommand {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        amount: String,
        /// Day of month the charge lands on (clamped to short months).
        #[arg(long, default_value_t = 1)]
        day: u32,
        /// Account the charge settles against.
        #[arg(long)]
        account: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Pause a template without losing it.
    Pause {
        #[arg(long)]
        name: String,
    },
    Resume {
        #[arg(long)]
        name: String,
    },
    /// Post this month's charges for every active template, once.
    Apply {
        /// Month as YYYY-MM; omitted means the current month.
        #[arg(long)]
        month: Option<String>,
    },
    List,
}

#[derive(Args, Debug)]
struct Split {
    #[command(subcommand)]
    command: SplitCommand,
}

#[derive(Subcommand, Debug)]
enum SplitCommand {
    /// Set the split from label=percent pairs, e.g. needs=50 wants=30 savings=20.
    Set { groups: Vec<String> },
    Show,
}

#[derive(Args, Debug)]
struct ImportArgs {
    #[arg(long)]
    file: String,
    /// Account the imported rows settle against.
    #[arg(long)]
    account: String,
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[arg(long)]
    file: String,
}

#[derive(Debug, serde::Deserialize)]
struct ImportRecord {
    date: NaiveDate,
    amount: String,
    counterparty: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let settings = settings::Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "quaderno={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let url = format!("sqlite:{}?mode=rwc", settings.database.path);
    let db = sea_orm::Database::connect(&url).await?;
    migration::Migrator::up(&db, None).await?;
    let mut engine = Engine::builder().database(db).build().await?;
    tracing::info!(database = %settings.database.path, "engine ready");

    match cli.command {
        Command::Account(account) => match account.command {
            AccountCommand::Create { name } => {
                let id = engine.new_account(&name).await?;
                println!("account {name} created ({id})");
            }
            AccountCommand::Archive { name } => {
                let id = engine.account_by_name(&name)?.id;
                engine.archive_account(id).await?;
                println!("account {name} archived");
            }
            AccountCommand::List => {
                for account in engine.accounts() {
                    let balance = engine.balance(account.id)?;
                    let marker = if account.archived { " (archived)" } else { "" };
                    println!("{}\t{}{}", account.name, balance, marker);
                }
            }
        },
        Command::Post(args) => {
            let draft = build_draft(&engine, args)?;
            let id = engine.post(draft).await?;
            println!("posted {id}");
        }
        Command::Amend(args) => {
            let draft = build_draft(&engine, args.content)?;
            let new_id = engine.amend(args.id, draft).await?;
            println!("amended {} -> {new_id}", args.id);
        }
        Command::Void(args) => {
            engine.void(args.id).await?;
            println!("voided {}", args.id);
        }
        Command::Balance(args) => {
            let id = engine.account_by_name(&args.account)?.id;
            let balance = match args.as_of {
                Some(as_of) => engine.balance_as_of(id, as_of)?,
                None => engine.balance(id)?,
            };
            println!("{balance}");
        }
        Command::Envelope(envelope) => match envelope.command {
            EnvelopeCommand::Create {
                name,
                category,
                tag,
                allocation,
                rollover,
            } => {
                let binding = binding_from(category, tag)?;
                let id = engine
                    .new_envelope(
                        &name,
                        binding,
                        allocation.parse::<Amount>()?,
                        rollover.parse::<Amount>()?,
                    )
                    .await?;
                println!("envelope {name} created ({id})");
            }
            EnvelopeCommand::Disable { name } => {
                let id = engine.envelope_by_name(&name)?.id;
                engine.disable_envelope(id).await?;
                println!("envelope {name} disabled");
            }
            EnvelopeCommand::List => {
                let month = Month::of(Utc::now().date_naive());
                for envelope in engine.envelopes() {
                    let allocation = engine.allocation(envelope.id, month)?;
                    let spent = engine.spent(envelope.id, month)?;
                    println!(
                        "{}\tallocated {}\tspent {}\tcarried {}",
                        envelope.name, allocation, spent, envelope.rollover_balance
                    );
                }
            }
        },
        Command::Allocate(args) => {
            let id = engine.envelope_by_name(&args.envelope)?.id;
            let month = Month::try_from(args.month.as_str())?;
            engine
                .allocate(id, month, args.amount.parse::<Amount>()?)
                .await?;
            println!("allocation for {} set", args.envelope);
        }
        Command::Rollover(args) => {
            let id = engine.envelope_by_name(&args.envelope)?.id;
            let month = Month::try_from(args.month.as_str())?;
            if args.force {
                engine.force_close(month);
            }
            let balance = engine.rollover(id, month).await?;
            println!("{} carries {balance} into {}", args.envelope, month.next());
        }
        Command::Goal(goal) => match goal.command {
            GoalCommand::Create {
                name,
                target,
                category,
                tag,
            } => {
                let scope = match (category, tag) {
                    (Some(category), None) => GoalScope::Category(category),
                    (None, Some(tag)) => GoalScope::Tag(tag),
                    (None, None) => GoalScope::Global,
                    (Some(_), Some(_)) => {
                        return Err("pass at most one of --category or --tag".into());
                    }
                };
                let id = engine
                    .new_goal(&name, scope, target.parse::<Amount>()?)
                    .await?;
                println!("goal {name} created ({id})");
            }
            GoalCommand::Progress { name } => {
                let id = engine.goal_by_name(&name)?.id;
                let progress = engine.progress(id)?;
                println!(
                    "{name}: {} of {} ({:.0}%, {})",
                    progress.current,
                    progress.target,
                    progress.fraction * 100.0,
                    progress.status.as_str()
                );
            }
            GoalCommand::Abandon { name } => {
                let id = engine.goal_by_name(&name)?.id;
                engine.abandon_goal(id).await?;
                println!("goal {name} abandoned");
            }
            GoalCommand::List => {
                for goal in engine.goals() {
                    let progress = engine.progress(goal.id)?;
                    println!(
                        "{}\t{} of {}\t{}",
                        goal.name,
                        progress.current,
                        progress.target,
                        goal.status.as_str()
                    );
                }
            }
        },
        Command::Recurring(recurring) => match recurring.command {
            RecurringCommand::Create {
                name,
                amount,
                day,
                account,
                category,
            } => {
                let account_id = engine.account_by_name(&account)?.id;
                let id = engine
                    .new_recurring(&name, amount.parse::<Amount>()?, day, account_id, category)
                    .await?;
                println!("recurring {name} created ({id})");
            }
            RecurringCommand::Pause { name } => {
                let id = engine.recurring_by_name(&name)?.id;
                engine.set_recurring_active(id, false).await?;
                println!("recurring {name} paused");
            }
            RecurringCommand::Resume { name } => {
                let id = engine.recurring_by_name(&name)?.id;
                engine.set_recurring_active(id, true).await?;
                println!("recurring {name} resumed");
            }
            RecurringCommand::Apply { month } => {
                let month = match month {
                    Some(raw) => Month::try_from(raw.as_str())?,
                    None => Month::of(Utc::now().date_naive()),
                };
                let created = engine.apply_recurring(month).await?;
                tracing::info!(%month, count = created.len(), "recurring charges applied");
                println!("{} charge(s) posted for {month}", created.len());
            }
            RecurringCommand::List => {
                for template in engine.recurring_templates() {
                    let account = engine.account(template.account_id)?;
                    let marker = if template.active { "" } else { " (paused)" };
                    println!(
                        "{}\t{} on day {}\tfrom {}{}",
                        template.name, template.amount, template.day_of_month, account.name, marker
                    );
                }
            }
        },
        Command::Split(split) => match split.command {
            SplitCommand::Set { groups } => {
                let groups = parse_groups(&groups)?;
                match engine.set_budget_split(groups.clone()).await {
                    Ok(()) => println!("split committed"),
                    Err(EngineError::Validation(msg)) => {
                        eprintln!("{msg}");
                        let corrected = engine::autocorrect_split(&groups);
                        let suggestion: Vec<String> = corrected
                            .iter()
                            .map(|g| format!("{}={}", g.label, g.percent))
                            .collect();
                        eprintln!("suggested: {}", suggestion.join(" "));
                        std::process::exit(1);
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            SplitCommand::Show => {
                for group in engine.budget_split() {
                    println!("{}\t{}%", group.label, group.percent);
                }
            }
        },
        Command::Import(args) => {
            let account_id = engine.account_by_name(&args.account)?.id;
            let mut reader = csv::Reader::from_path(&args.file)?;
            let mut rows = Vec::new();
            for record in reader.deserialize::<ImportRecord>() {
                let record = record?;
                rows.push(CandidateRow {
                    posted_date: record.date,
                    amount: record.amount.parse::<Amount>()?,
                    counterparty: record.counterparty,
                });
            }

            let rules = rules_from(&settings);
            let report = engine
                .import_batch(rows, rules.as_ref(), account_id)
                .await?;
            tracing::info!(
                file = %args.file,
                accepted = report.accepted.len(),
                rejected = report.rejected.len(),
                "import finished"
            );
            println!(
                "imported {} rows, {} rejected",
                report.accepted.len(),
                report.rejected.len()
            );
            for (row, reason) in &report.rejected {
                println!("  rejected {:?} ({}): {:?}", row.counterparty, row.amount, reason);
            }
        }
        Command::Export(args) => {
            let mut writer = csv::Writer::from_path(&args.file)?;
            writer.write_record([
                "date",
                "kind",
                "amount",
                "category",
                "tags",
                "description",
                "from",
                "to",
            ])?;
            for tx in engine.export_rows() {
                let from = tx
                    .account_from
                    .map(|id| engine.account(id).map(|a| a.name.clone()))
                    .transpose()?
                    .unwrap_or_default();
                let to = tx
                    .account_to
                    .map(|id| engine.account(id).map(|a| a.name.clone()))
                    .transpose()?
                    .unwrap_or_default();
                let tags: Vec<&str> = tx.tags.iter().map(String::as_str).collect();
                writer.write_record([
                    tx.posted_date.to_string(),
                    tx.kind.as_str().to_string(),
                    tx.amount.to_string(),
                    tx.category.clone().unwrap_or_default(),
                    tags.join(","),
                    tx.description.clone(),
                    from,
                    to,
                ])?;
            }
            writer.flush()?;
            println!("exported to {}", args.file);
        }
        Command::Undo => match engine.undo().await {
            Ok(()) => println!("undone"),
            Err(EngineError::NothingToUndo) => println!("nothing to undo"),
            Err(err) => return Err(err.into()),
        },
    }

    Ok(())
}

fn build_draft(engine: &Engine, args: PostArgs) -> Result<TransactionDraft, Box<dyn Error + Send + Sync>> {
    let kind = TransactionKind::try_from(args.kind.as_str())?;
    let amount = args.amount.parse::<Amount>()?;
    let date = args.date.unwrap_or_else(|| Utc::now().date_naive());
    let from = args
        .from
        .map(|name| engine.account_by_name(&name).map(|a| a.id))
        .transpose()?;
    let to = args
        .to
        .map(|name| engine.account_by_name(&name).map(|a| a.id))
        .transpose()?;

    Ok(
        TransactionDraft::manual(date, kind, amount, args.description, from, to)
            .with_category(args.category)
            .with_tags(args.tags),
    )
}

fn binding_from(
    category: Option<String>,
    tag: Option<String>,
) -> Result<EnvelopeBinding, Box<dyn Error + Send + Sync>> {
    match (category, tag) {
        (Some(category), None) => Ok(EnvelopeBinding::Category(category)),
        (None, Some(tag)) => Ok(EnvelopeBinding::Tag(tag)),
        _ => Err("pass exactly one of --category or --tag".into()),
    }
}

fn parse_groups(raw: &[String]) -> Result<Vec<BudgetGroup>, Box<dyn Error + Send + Sync>> {
    let mut groups = Vec::with_capacity(raw.len());
    for pair in raw {
        let (label, percent) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected label=percent, got {pair:?}"))?;
        groups.push(BudgetGroup::new(label, percent.parse::<u32>()?));
    }
    Ok(groups)
}

fn rules_from(settings: &settings::Settings) -> Box<dyn ClassifyRules> {
    match &settings.rules {
        Some(rules) => Box::new(SubstringRules::new(rules.iter().map(
            |(pattern, category)| {
                (
                    pattern.clone(),
                    Classification {
                        category: category.clone(),
                        tags: Vec::new(),
                    },
                )
            },
        ))),
        None => Box::new(NoRules),
    }
}
