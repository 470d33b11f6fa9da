use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use crm_api::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::{CustomerSource, OrderSource, UserRole},
    events::EventSender,
    imports::{
        legacy::{self, LegacyOptions, DEFAULT_CUSTOMERS_TABLE, DEFAULT_ORDERS_TABLE},
        ImportService,
    },
    services::users::{CreateUserRequest, UserService},
    unify::ImportReport,
};
use serde::Serialize;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::CreateUser(args) => handle_create_user(&context, args, cli.json).await?,
        Commands::ImportCustomers(args) => handle_import_customers(&context, args, cli.json).await?,
        Commands::ImportOrders(args) => handle_import_orders(&context, args, cli.json).await?,
        Commands::MigrateLegacy(args) => handle_migrate_legacy(&context, args, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "crm-cli", about = "CRM administration: migrations, staff accounts and batch imports", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Create a staff account (use it to bootstrap the first admin)
    CreateUser(CreateUserArgs),
    /// Import a customer CSV export
    ImportCustomers(CustomerImportArgs),
    /// Import an order CSV export (one row per line item)
    ImportOrders(OrderImportArgs),
    /// Copy customers and orders from the previous SQLite database
    MigrateLegacy(MigrateLegacyArgs),
}

#[derive(Args)]
struct CreateUserArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "CRM_USER_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long, default_value = "admin")]
    role: UserRole,
}

#[derive(Args)]
struct CustomerImportArgs {
    #[arg(long, default_value = "csv_import")]
    source: CustomerSource,
    file: PathBuf,
}

#[derive(Args)]
struct OrderImportArgs {
    #[arg(long)]
    source: OrderSource,
    file: PathBuf,
}

#[derive(Args)]
struct MigrateLegacyArgs {
    /// Legacy database URL, e.g. sqlite://old.db?mode=ro
    #[arg(long = "from")]
    from: String,
    #[arg(long, default_value = DEFAULT_CUSTOMERS_TABLE)]
    customers_table: String,
    #[arg(long, default_value = DEFAULT_ORDERS_TABLE)]
    orders_table: String,
    /// System the legacy orders came from
    #[arg(long, default_value = "manual")]
    source: OrderSource,
    /// Parse and report without keeping anything
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,
}

async fn handle_create_user(context: &CliContext, args: CreateUserArgs, json: bool) -> Result<()> {
    let service = UserService::new(context.db.clone());
    let user = service
        .create_user(CreateUserRequest {
            name: args.name,
            email: args.email,
            password: args.password,
            role: args.role,
        })
        .await
        .context("failed to create user")?;

    if json {
        print_json(&user)?;
    } else {
        println!("Created {} user {} (id {})", user.role, user.email, user.id);
    }
    Ok(())
}

fn read_file(path: &PathBuf) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

async fn handle_import_customers(
    context: &CliContext,
    args: CustomerImportArgs,
    json: bool,
) -> Result<()> {
    let data = read_file(&args.file)?;
    let report = context
        .import_service()
        .import_customers_csv(&data, args.source)
        .await
        .context("customer import failed")?;
    render_report("customers", &report, json)
}

async fn handle_import_orders(context: &CliContext, args: OrderImportArgs, json: bool) -> Result<()> {
    let data = read_file(&args.file)?;
    let report = context
        .import_service()
        .import_orders_csv(&data, args.source)
        .await
        .context("order import failed")?;
    render_report("orders", &report, json)
}

async fn handle_migrate_legacy(
    context: &CliContext,
    args: MigrateLegacyArgs,
    json: bool,
) -> Result<()> {
    let legacy_db = db::establish_connection(&args.from)
        .await
        .context("failed to open legacy database")?;
    let options = LegacyOptions {
        customers_table: args.customers_table,
        orders_table: args.orders_table,
        source: args.source,
        dry_run: args.dry_run,
    };
    let report = legacy::migrate_legacy(
        &context.db,
        &legacy_db,
        &options,
        context.config.bags_per_pallet,
    )
    .await
    .context("legacy migration failed")?;

    if json {
        return print_json(&report);
    }
    if report.dry_run {
        println!("Dry run: nothing was written");
    }
    render_report("customers", &report.customers, false)?;
    render_report("orders", &report.orders, false)?;
    if !report.ignored_columns.is_empty() {
        println!("Ignored columns: {}", report.ignored_columns.join(", "));
    }
    Ok(())
}

fn render_report(kind: &str, report: &ImportReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    println!(
        "{}: {} inserted, {} updated, {} skipped",
        kind, report.inserted, report.updated, report.skipped
    );
    for issue in &report.issues {
        println!("  row {}: {}", issue.row, issue.reason);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        // No dashboards or subscribers in a one-shot process; events are only logged
        let (event_sender, mut event_rx) = EventSender::channel();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                debug!(target: "crm_cli", event = event.name(), "event emitted");
            }
        });

        Ok(Self {
            config,
            db,
            event_sender,
        })
    }

    fn import_service(&self) -> ImportService {
        ImportService::new(
            self.db.clone(),
            self.event_sender.clone(),
            self.config.bags_per_pallet,
        )
    }
}
