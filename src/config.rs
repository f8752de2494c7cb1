use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use crate::factors::FactorTable;

/// Settings shared by every subcommand, read from flags or the environment.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Emission factor table (CSV)
    #[arg(
        long = "factors",
        env = "EMISSION_FACTORS_PATH",
        global = true,
        default_value = "emission_factors.csv"
    )]
    pub factors_path: PathBuf,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", global = true, default_value_t = 5)]
    pub max_connections: u32,

    /// How long an extracted bill waits to be saved or discarded
    #[arg(long, env = "PENDING_TTL_MINUTES", global = true, default_value_t = 30)]
    pub pending_ttl_minutes: i64,
}

impl Settings {
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

    /// Read fresh for each command; nothing is cached between runs.
    pub fn load_factors(&self) -> anyhow::Result<FactorTable> {
        FactorTable::load(&self.factors_path)
    }

    pub fn pending_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pending_ttl_minutes.max(1))
    }
}

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
