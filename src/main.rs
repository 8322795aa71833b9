use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use jobtrack_analytics::analytics::Aggregator;
use jobtrack_analytics::config::{GlobalArgs, Settings};
use jobtrack_analytics::db::{self, PostgresStore};
use jobtrack_analytics::error::{AnalyticsError, OwnerId};
use jobtrack_analytics::models::{Granularity, Series};
use jobtrack_analytics::report;

#[derive(Parser)]
#[command(name = "jobtrack-analytics")]
#[command(about = "Aggregate job application activity into dashboard analytics", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScopeArgs {
    /// Owner whose applications are aggregated
    #[arg(long, env = "JOBTRACK_OWNER")]
    owner: String,
    /// Evaluate as of this RFC 3339 timestamp instead of the current time
    #[arg(long)]
    now: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo applications for the seed owner
    Seed,
    /// Import applications from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Applications per day for the last 7 days
    Daily(ScopeArgs),
    /// Applications per week for the last 8 weeks (weeks without applications are omitted)
    Weekly(ScopeArgs),
    /// Applications per month for the current year
    Monthly(ScopeArgs),
    /// Applications per status
    Status(ScopeArgs),
    /// Counts for today, this week, this month and overall
    Summary(ScopeArgs),
    /// Every view above as a single JSON document
    Dashboard(ScopeArgs),
    /// Write a markdown dashboard report
    Report {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value = "dashboard.md")]
        out: PathBuf,
    },
}

impl ScopeArgs {
    fn resolve(&self) -> anyhow::Result<(OwnerId, DateTime<Utc>)> {
        let owner = OwnerId::parse(&self.owner)?;
        Ok((owner, self.now.unwrap_or_else(Utc::now)))
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn unavailable(err: AnalyticsError) -> anyhow::Error {
    if err.is_transient() {
        anyhow::Error::new(err).context("analytics temporarily unavailable")
    } else {
        err.into()
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let settings = Settings::from_args(&cli.global)?;
    debug!(
        offset_seconds = settings.calendar.offset_seconds(),
        week_start = ?settings.calendar.week_start(),
        "resolved settings"
    );

    let pool = settings.connect().await?;
    let store = PostgresStore::new(pool.clone());
    let aggregator = Aggregator::new(store.clone(), settings.calendar);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = store.seed(Utc::now()).await?;
            println!("Inserted {inserted} applications for owner {}.", db::SEED_OWNER);
        }
        Commands::Import { csv } => {
            let inserted = store.import_csv(&csv).await?;
            info!(inserted, path = %csv.display(), "import finished");
            println!("Inserted {inserted} applications from {}.", csv.display());
        }
        Commands::Daily(scope) => print_series(&aggregator, Granularity::Day, &scope).await?,
        Commands::Weekly(scope) => print_series(&aggregator, Granularity::Week, &scope).await?,
        Commands::Monthly(scope) => print_series(&aggregator, Granularity::Month, &scope).await?,
        Commands::Status(scope) => print_series(&aggregator, Granularity::Status, &scope).await?,
        Commands::Summary(scope) => {
            let (owner, now) = scope.resolve()?;
            let summary = aggregator
                .get_dashboard_summary(owner, now)
                .await
                .map_err(unavailable)?;
            print_json(&summary)?;
        }
        Commands::Dashboard(scope) => {
            let (owner, now) = scope.resolve()?;
            let snapshot = aggregator.snapshot(owner, now).await.map_err(unavailable)?;
            print_json(&snapshot)?;
        }
        Commands::Report { scope, out } => {
            let (owner, now) = scope.resolve()?;
            let snapshot = aggregator.snapshot(owner, now).await.map_err(unavailable)?;
            let report = report::build_report(owner, aggregator.calendar(), &snapshot);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

/// Prints the bare bucket list so each view keeps its documented JSON shape.
async fn print_series(
    aggregator: &Aggregator<PostgresStore>,
    granularity: Granularity,
    scope: &ScopeArgs,
) -> anyhow::Result<()> {
    let (owner, now) = scope.resolve()?;
    let series = aggregator
        .series(owner, granularity, now)
        .await
        .map_err(unavailable)?;
    match series {
        Series::Day(buckets) => print_json(&buckets),
        Series::Week(buckets) => print_json(&buckets),
        Series::Month(buckets) => print_json(&buckets),
        Series::Status(buckets) => print_json(&buckets),
    }
}
