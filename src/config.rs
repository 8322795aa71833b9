use anyhow::Context;
use clap::Args;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::calendar::{Calendar, WeekStart};

/// Connection and calendar options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "JOBTRACK_MAX_CONNECTIONS", default_value_t = 5, global = true)]
    pub max_connections: u32,

    /// Offset from UTC, in minutes, of the calendar used for day/week/month buckets
    #[arg(
        long,
        env = "JOBTRACK_UTC_OFFSET_MINUTES",
        default_value_t = 0,
        allow_negative_numbers = true,
        global = true
    )]
    pub utc_offset_minutes: i32,

    #[arg(
        long,
        env = "JOBTRACK_WEEK_START",
        value_enum,
        default_value_t = WeekStart::Sunday,
        global = true
    )]
    pub week_start: WeekStart,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub calendar: Calendar,
}

impl Settings {
    pub fn from_args(args: &GlobalArgs) -> anyhow::Result<Self> {
        let calendar = Calendar::from_offset_minutes(args.utc_offset_minutes, args.week_start)
            .with_context(|| {
                format!(
                    "utc offset of {} minutes is outside the supported ±18 hours",
                    args.utc_offset_minutes
                )
            })?;
        anyhow::ensure!(args.max_connections > 0, "max connections must be at least 1");

        Ok(Self {
            database_url: args.database_url.clone(),
            max_connections: args.max_connections,
            calendar,
        })
    }

    pub async fn connect(&self) -> anyhow::Result<PgPool> {
        let database_url = self
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set to a Postgres instance")?;

        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")
    }
}
