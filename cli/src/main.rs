use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use brokerage::calendar::EventDraft;
use brokerage::clock::{self, Clock};
use brokerage::finance::{self, ExpenseDraft, FinanceDraft, RevenueDraft};
use brokerage::leads::InterestForm;
use brokerage::listings::{ListingDraft, ListingFilter};
use brokerage::model::{
    AccessCodes, ContactInfo, ExpenseCategory, FinancialRecord, Id, LeadStatus, ListingType, RevenueCategory,
};
use brokerage::owners::OwnerDraft;
use brokerage::transfer;
use brokerage::{AccessError, FileStorage, Role, Session, StorageError, Store, StoreConfig, StoreError};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing_subscriber::EnvFilter;


#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("login failed: {0}")]
    Access(#[from] AccessError),
    #[error("failed to access `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("missing master password; pass `codes set --master <PASSWORD>`")]
    MissingMasterPassword,
    #[error("invalid date `{0}`; expected YYYY-MM-DD")]
    InvalidDate(String),
}

#[derive(Parser, Debug)]
#[command(name = "brokerage", about = "Brokerage data store CLI")]
struct Cli {
    #[arg(long, env = "BROKERAGE_DATA_DIR", default_value = "./brokerage-data")]
    data_dir: PathBuf,

    /// Master password the store accepts; defaults to the built-in one.
    #[arg(long, env = "BROKERAGE_MASTER_PASSWORD")]
    master_override: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write every collection, seeding defaults for missing ones.
    Init,
    /// Print the export document, or write it to a file.
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Replace collections from an export document.
    Import { file: PathBuf },
    Listing(ListingCommand),
    Lead(LeadCommand),
    Owner(OwnerCommand),
    Event(EventCommand),
    Note(NoteCommand),
    Finance(FinanceCommand),
    /// Check an access code; the exit status reports the result.
    Login {
        #[arg(long)]
        role: Role,
        #[arg(long)]
        code: String,
    },
    Contact(ContactCommand),
    Codes(CodesCommand),
}

#[derive(Args, Debug)]
struct ListingCommand {
    #[command(subcommand)]
    command: ListingSubcommand,
}

#[derive(Subcommand, Debug)]
enum ListingSubcommand {
    List {
        #[arg(long, default_value = "all")]
        filter: ListingFilter,
        #[arg(long, default_value = "")]
        search: String,
    },
    Show {
        id: Id,
    },
    Create {
        #[arg(long)]
        title: String,
        #[arg(long = "type", default_value = "rent", value_parser = parse_enum::<ListingType>)]
        kind: ListingType,
        #[arg(long)]
        price: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        location: String,
        #[arg(long)]
        owner_id: Option<Id>,
    },
    Delete {
        id: Id,
    },
}

#[derive(Args, Debug)]
struct LeadCommand {
    #[command(subcommand)]
    command: LeadSubcommand,
}

#[derive(Subcommand, Debug)]
enum LeadSubcommand {
    List {
        #[arg(long)]
        status: Option<LeadStatus>,
    },
    Submit {
        listing_id: Id,
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        message: String,
    },
    Status {
        id: Id,
        status: LeadStatus,
    },
    Delete {
        id: Id,
    },
}

#[derive(Args, Debug)]
struct OwnerCommand {
    #[command(subcommand)]
    command: OwnerSubcommand,
}

#[derive(Subcommand, Debug)]
enum OwnerSubcommand {
    List,
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "")]
        address: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    Delete {
        id: Id,
    },
}

#[derive(Args, Debug)]
struct EventCommand {
    #[command(subcommand)]
    command: EventSubcommand,
}

#[derive(Subcommand, Debug)]
enum EventSubcommand {
    List {
        /// Only events on this UTC day (YYYY-MM-DD).
        #[arg(long)]
        date: Option<String>,
    },
    Add {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        number: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        date: Option<String>,
    },
    /// Change an event; omitted fields keep their value.
    Edit {
        id: Id,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        number: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        date: Option<String>,
    },
    Delete {
        id: Id,
    },
}

#[derive(Args, Debug)]
struct NoteCommand {
    #[command(subcommand)]
    command: NoteSubcommand,
}

#[derive(Subcommand, Debug)]
enum NoteSubcommand {
    List,
    Add { content: String },
    Edit { id: Id, content: String },
    Delete { id: Id },
}

#[derive(Args, Debug)]
struct FinanceCommand {
    #[command(subcommand)]
    command: FinanceSubcommand,
}

#[derive(Subcommand, Debug)]
enum FinanceSubcommand {
    Summary,
    Expense {
        #[arg(long)]
        description: String,
        #[arg(long)]
        amount: String,
        #[arg(long, default_value = "other", value_parser = parse_enum::<ExpenseCategory>)]
        category: ExpenseCategory,
        #[arg(long)]
        date: Option<String>,
    },
    Revenue {
        #[arg(long)]
        description: String,
        #[arg(long)]
        amount: String,
        #[arg(long, default_value = "other", value_parser = parse_enum::<RevenueCategory>)]
        category: RevenueCategory,
        #[arg(long)]
        date: Option<String>,
    },
    UpdateExpense {
        id: Id,
        #[command(flatten)]
        change: RecordChange,
        #[arg(long, value_parser = parse_enum::<ExpenseCategory>)]
        category: Option<ExpenseCategory>,
    },
    UpdateRevenue {
        id: Id,
        #[command(flatten)]
        change: RecordChange,
        #[arg(long, value_parser = parse_enum::<RevenueCategory>)]
        category: Option<RevenueCategory>,
    },
    DeleteExpense {
        id: Id,
    },
    DeleteRevenue {
        id: Id,
    },
}

/// Fields shared by `update-expense` and `update-revenue`; omitted ones keep
/// their value.
#[derive(Args, Debug)]
struct RecordChange {
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    amount: Option<String>,
    #[arg(long)]
    date: Option<String>,
}

impl RecordChange {
    fn apply<C>(self, record: &mut FinancialRecord<C>, category: Option<C>) -> Result<(), CliError> {
        if let Some(description) = self.description {
            record.description = description;
        }
        if let Some(amount) = self.amount {
            record.amount = finance::parse_amount(&amount)?;
        }
        if let Some(date) = self.date {
            record.date = date;
        }
        if let Some(category) = category {
            record.category = category;
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
struct ContactCommand {
    #[command(subcommand)]
    command: ContactSubcommand,
}

#[derive(Subcommand, Debug)]
enum ContactSubcommand {
    Show,
    Set {
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
}

#[derive(Args, Debug)]
struct CodesCommand {
    #[command(subcommand)]
    command: CodesSubcommand,
}

#[derive(Subcommand, Debug)]
enum CodesSubcommand {
    Set {
        /// Master password authorizing the change.
        #[arg(long)]
        master: Option<String>,
        #[arg(long)]
        admin: String,
        #[arg(long)]
        owner: String,
    },
}

type CliStore = Store<FileStorage>;

fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut stdout = io::stdout().lock();
    run(cli, &mut stdout)
}

fn run(cli: Cli, out: &mut impl Write) -> Result<(), CliError> {
    let storage = FileStorage::open(&cli.data_dir)?;
    let mut store = Store::open(storage);
    if let Some(password) = cli.master_override {
        store = store.with_config(StoreConfig { master_password: password });
    }

    match cli.command {
        Command::Init => {
            store.persist_all()?;
            print_json(out, &json!({ "dataDir": cli.data_dir, "collections": brokerage::Collection::ALL.len() }))
        }
        Command::Export { output } => run_export(&store, output, out),
        Command::Import { file } => {
            let raw = fs::read_to_string(&file).map_err(|source| io_error(&file, source))?;
            let report = store.import_json(&raw)?;
            print_json(out, &json!({ "applied": report.applied, "skipped": report.skipped }))
        }
        Command::Listing(cmd) => run_listing(&mut store, cmd, out),
        Command::Lead(cmd) => run_lead(&mut store, cmd, out),
        Command::Owner(cmd) => run_owner(&mut store, cmd, out),
        Command::Event(cmd) => run_event(&mut store, cmd, out),
        Command::Note(cmd) => run_note(&mut store, cmd, out),
        Command::Finance(cmd) => run_finance(&mut store, cmd, out),
        Command::Login { role, code } => {
            let mut session = Session::new();
            let role = session.login_as(role, &code, store.access_codes())?;
            print_json(out, &json!({ "role": role, "authenticated": session.is_authenticated() }))
        }
        Command::Contact(cmd) => run_contact(&mut store, cmd, out),
        Command::Codes(cmd) => match cmd.command {
            CodesSubcommand::Set { master, admin, owner } => {
                let master = master.ok_or(CliError::MissingMasterPassword)?;
                store.update_access_codes(&master, AccessCodes { admin, owner })?;
                print_json(out, store.access_codes())
            }
        },
    }
}

fn run_export(store: &CliStore, output: Option<PathBuf>, out: &mut impl Write) -> Result<(), CliError> {
    let rendered = store.export_json()?;
    let Some(path) = output else {
        writeln!(out, "{rendered}").map_err(|source| io_error("stdout", source))?;
        return Ok(());
    };
    let path = if path.is_dir() { path.join(transfer::export_file_name(store.clock().now_ms())) } else { path };
    fs::write(&path, rendered).map_err(|source| io_error(&path, source))?;
    tracing::info!(path = %path.display(), "export written");
    print_json(out, &json!({ "path": path }))
}

fn run_listing(store: &mut CliStore, cmd: ListingCommand, out: &mut impl Write) -> Result<(), CliError> {
    match cmd.command {
        ListingSubcommand::List { filter, search } => print_json(out, &store.visible_listings(filter, &search)),
        ListingSubcommand::Show { id } => {
            let listing = store.listing(id).ok_or(StoreError::NotFound { kind: "listing", id })?;
            print_json(out, listing)
        }
        ListingSubcommand::Create { title, kind, price, description, location, owner_id } => {
            let draft = ListingDraft { title, kind, price, description, location, owner_id, ..ListingDraft::default() };
            let listing = store.create_listing(draft)?;
            print_json(out, &listing)
        }
        ListingSubcommand::Delete { id } => {
            store.delete_listing(id)?;
            print_json(out, &json!({ "deleted": id }))
        }
    }
}

fn run_lead(store: &mut CliStore, cmd: LeadCommand, out: &mut impl Write) -> Result<(), CliError> {
    match cmd.command {
        LeadSubcommand::List { status } => {
            let leads: Vec<_> = store.leads().iter().filter(|l| status.is_none_or(|s| l.status == s)).collect();
            print_json(out, &leads)
        }
        LeadSubcommand::Submit { listing_id, name, phone, email, message } => {
            let lead = store.submit_interest(listing_id, InterestForm { name, phone, email, message })?;
            print_json(out, &lead)
        }
        LeadSubcommand::Status { id, status } => {
            store.set_lead_status(id, status)?;
            print_json(out, &store.lead(id))
        }
        LeadSubcommand::Delete { id } => {
            store.delete_lead(id)?;
            print_json(out, &json!({ "deleted": id }))
        }
    }
}

fn run_owner(store: &mut CliStore, cmd: OwnerCommand, out: &mut impl Write) -> Result<(), CliError> {
    match cmd.command {
        OwnerSubcommand::List => print_json(out, store.owners()),
        OwnerSubcommand::Create { name, phone, email, address, notes } => {
            let owner = store.create_owner(OwnerDraft { name, phone, email, address, notes })?;
            print_json(out, &owner)
        }
        OwnerSubcommand::Delete { id } => {
            store.delete_owner(id)?;
            print_json(out, &json!({ "deleted": id }))
        }
    }
}

fn run_event(store: &mut CliStore, cmd: EventCommand, out: &mut impl Write) -> Result<(), CliError> {
    match cmd.command {
        EventSubcommand::List { date: None } => print_json(out, store.events()),
        EventSubcommand::List { date: Some(raw) } => {
            let day = clock::parse_date(&raw).ok_or(CliError::InvalidDate(raw))?;
            print_json(out, &store.events_on(day))
        }
        EventSubcommand::Add { title, name, number, description, date } => {
            let event = store.add_event(EventDraft { name, number, title, description, date })?;
            print_json(out, &event)
        }
        EventSubcommand::Edit { id, title, name, number, description, date } => {
            let mut event = store.event(id).cloned().ok_or(StoreError::NotFound { kind: "event", id })?;
            event.title = title.unwrap_or(event.title);
            event.name = name.unwrap_or(event.name);
            event.number = number.unwrap_or(event.number);
            event.description = description.unwrap_or(event.description);
            event.date = date.unwrap_or(event.date);
            store.update_event(event)?;
            print_json(out, &store.event(id))
        }
        EventSubcommand::Delete { id } => {
            store.delete_event(id)?;
            print_json(out, &json!({ "deleted": id }))
        }
    }
}

fn run_note(store: &mut CliStore, cmd: NoteCommand, out: &mut impl Write) -> Result<(), CliError> {
    match cmd.command {
        NoteSubcommand::List => print_json(out, store.notes()),
        NoteSubcommand::Add { content } => {
            let note = store.add_note(&content)?;
            print_json(out, &note)
        }
        NoteSubcommand::Edit { id, content } => {
            let note = store.edit_note(id, &content)?;
            print_json(out, &note)
        }
        NoteSubcommand::Delete { id } => {
            store.delete_note(id)?;
            print_json(out, &json!({ "deleted": id }))
        }
    }
}

fn run_finance(store: &mut CliStore, cmd: FinanceCommand, out: &mut impl Write) -> Result<(), CliError> {
    match cmd.command {
        FinanceSubcommand::Summary => {
            let summary = store.summary();
            print_json(
                out,
                &json!({
                    "totalExpenses": summary.total_expenses,
                    "totalRevenues": summary.total_revenues,
                    "profit": summary.profit,
                }),
            )
        }
        FinanceSubcommand::Expense { description, amount, category, date } => {
            let draft: ExpenseDraft = FinanceDraft { description, amount, category, date };
            let record = store.add_expense(draft)?;
            print_json(out, &record)
        }
        FinanceSubcommand::Revenue { description, amount, category, date } => {
            let draft: RevenueDraft = FinanceDraft { description, amount, category, date };
            let record = store.add_revenue(draft)?;
            print_json(out, &record)
        }
        FinanceSubcommand::UpdateExpense { id, change, category } => {
            let mut record = store
                .expenses()
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .ok_or(StoreError::NotFound { kind: "expense", id })?;
            change.apply(&mut record, category)?;
            store.update_expense(record.clone())?;
            print_json(out, &record)
        }
        FinanceSubcommand::UpdateRevenue { id, change, category } => {
            let mut record = store
                .revenues()
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .ok_or(StoreError::NotFound { kind: "revenue", id })?;
            change.apply(&mut record, category)?;
            store.update_revenue(record.clone())?;
            print_json(out, &record)
        }
        FinanceSubcommand::DeleteExpense { id } => {
            store.delete_expense(id)?;
            print_json(out, &json!({ "deleted": id }))
        }
        FinanceSubcommand::DeleteRevenue { id } => {
            store.delete_revenue(id)?;
            print_json(out, &json!({ "deleted": id }))
        }
    }
}

fn run_contact(store: &mut CliStore, cmd: ContactCommand, out: &mut impl Write) -> Result<(), CliError> {
    match cmd.command {
        ContactSubcommand::Show => print_json(out, store.contact_info()),
        ContactSubcommand::Set { phone, email } => {
            let current = store.contact_info().clone();
            let info = ContactInfo {
                phone: phone.unwrap_or(current.phone),
                email: email.unwrap_or(current.email),
            };
            store.update_contact_info(info)?;
            print_json(out, store.contact_info())
        }
    }
}

/// Parse an enum through its serde spelling, so every alias the store reads
/// is accepted on the command line too.
fn parse_enum<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_owned())).map_err(|e| e.to_string())
}

fn io_error(path: impl AsRef<std::path::Path>, source: io::Error) -> CliError {
    CliError::Io { path: path.as_ref().display().to_string(), source }
}

fn print_json<T: Serialize + ?Sized>(out: &mut impl Write, value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    writeln!(out, "{rendered}").map_err(|source| io_error("stdout", source))
}
