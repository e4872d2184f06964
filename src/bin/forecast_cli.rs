use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use pos_forecast_api::{
    config::{self, AppConfig},
    db::{self, DbPool},
    services::forecasting::{
        BatchResult, CleanupResult, DbForecastStateStore, ForecastService, ForecastSettings,
        ForecastStateStore,
    },
};
use serde::Serialize;
use uuid::Uuid;

const MAX_PRINTED_ERRORS: usize = 5;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Generate(args) => handle_generate(&context, args, cli.json).await?,
        Commands::Cleanup(args) => handle_cleanup(&context, args, cli.json).await?,
        Commands::Status => handle_status(&context, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "forecast-cli", about = "Generate, clean up and inspect POS demand forecasts", version)]
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
    /// Regenerate forecasts for the top products (or one product)
    Generate(GenerateArgs),
    /// Delete forecast rows older than a number of days
    Cleanup(CleanupArgs),
    /// Show the regeneration schedule
    Status,
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Generate even if the last run is within the configured interval"
    )]
    force: bool,
    #[arg(long, help = "Only regenerate forecasts for this product")]
    product: Option<Uuid>,
}

#[derive(Args)]
struct CleanupArgs {
    #[arg(long, help = "Age threshold in days (defaults to forecasting.cleanup_days)")]
    days: Option<u32>,
    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Count matching rows without deleting them"
    )]
    dry_run: bool,
}

struct CliContext {
    config: AppConfig,
    service: ForecastService,
    store: DbForecastStateStore,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }
        let db: Arc<DbPool> = Arc::new(db_pool);

        let service = ForecastService::with_db_ledger(db.clone(), config.forecasting.clone());
        let store = DbForecastStateStore::new(db, &config.forecasting);

        Ok(Self {
            config,
            service,
            store,
        })
    }
}

async fn handle_generate(context: &CliContext, args: GenerateArgs, json: bool) -> Result<()> {
    if !args.force {
        let settings = context
            .store
            .get()
            .await
            .context("failed to read forecast schedule")?;
        let now = Utc::now();
        if !settings.should_generate(now) {
            match settings.days_until_next_generation(now) {
                Some(days) => println!(
                    "Forecasts are up to date; next generation due in {} day(s). Use --force to regenerate now.",
                    days
                ),
                None => println!(
                    "Automatic generation is disabled. Use --force to regenerate now."
                ),
            }
            return Ok(());
        }
    }

    let result = match args.product {
        Some(product_id) => context
            .service
            .generate_for_product(product_id)
            .await
            .with_context(|| format!("failed to generate forecasts for product {}", product_id))?,
        None => {
            let result = context
                .service
                .generate_all()
                .await
                .context("forecast generation failed")?;
            context
                .store
                .mark_generated(Utc::now())
                .await
                .context("failed to record generation time")?;
            result
        }
    };

    if json {
        print_json(&result)?;
    } else {
        render_batch(&result);
    }
    Ok(())
}

async fn handle_cleanup(context: &CliContext, args: CleanupArgs, json: bool) -> Result<()> {
    let days = args
        .days
        .unwrap_or(context.config.forecasting.cleanup_days);
    let result = context
        .service
        .cleanup_older_than(days, args.dry_run)
        .await
        .context("forecast cleanup failed")?;

    if json {
        print_json(&result)?;
    } else {
        render_cleanup(&result);
    }
    Ok(())
}

async fn handle_status(context: &CliContext, json: bool) -> Result<()> {
    let settings = context
        .store
        .get()
        .await
        .context("failed to read forecast schedule")?;

    if json {
        print_json(&settings)?;
    } else {
        render_settings(&settings);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_batch(result: &BatchResult) {
    println!(
        "Generated {} forecast row(s) for {} product(s)",
        result.forecasts_generated, result.products_processed
    );
    if result.errors.is_empty() {
        return;
    }
    println!("{} product(s) failed:", result.errors.len());
    for error in result.errors.iter().take(MAX_PRINTED_ERRORS) {
        println!("- {}", error);
    }
    if result.errors.len() > MAX_PRINTED_ERRORS {
        println!("... and {} more", result.errors.len() - MAX_PRINTED_ERRORS);
    }
}

fn render_cleanup(result: &CleanupResult) {
    if result.dry_run {
        println!(
            "Dry run: {} forecast row(s) dated before {} would be deleted",
            result.matched, result.cutoff
        );
    } else {
        println!(
            "Deleted {} forecast row(s) dated before {}",
            result.deleted, result.cutoff
        );
    }
}

fn render_settings(settings: &ForecastSettings) {
    let now = Utc::now();
    println!("Enabled: {}", settings.enabled);
    println!("Interval: {} day(s)", settings.interval_days);
    match settings.last_generated {
        Some(at) => println!("Last generated: {}", at.to_rfc3339()),
        None => println!("Last generated: never"),
    }
    match settings.days_until_next_generation(now) {
        Some(0) => println!("Next generation: due now"),
        Some(days) => println!("Next generation: in {} day(s)", days),
        None => println!("Next generation: disabled"),
    }
}
