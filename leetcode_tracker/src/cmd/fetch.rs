use crate::{
    cmd::TriggerKind,
    modules::{contests::fetcher::ContestFetcher, migration::MIGRATOR},
};
use anyhow::{Context, Result};
use clap::Args;
use sqlx::{postgres::Postgres, Pool};
use std::env;

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// 実行するトリガーの種別
    kind: TriggerKind,
}

pub async fn run(args: FetchArgs) -> Result<()> {
    let database_url: String = env::var("DATABASE_URL").with_context(|| {
        let message = "DATABASE_URL must be configured.";
        tracing::error!(message);
        message
    })?;

    let pool: Pool<Postgres> = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .with_context(|| {
            let message = "Failed to create database connection pool.";
            tracing::error!(message);
            message
        })?;

    MIGRATOR.run(&pool).await?;

    let fetcher = ContestFetcher::new(&pool)?;
    let summaries = fetcher.run_automation(args.kind).await?;

    for summary in summaries.iter() {
        tracing::info!(
            "Contest {} ({}): {} participated, {} absent, {} rows stored.",
            summary.contest_id,
            summary.title,
            summary.found_users,
            summary.not_found_users,
            summary.total_stored,
        );
    }

    Ok(())
}
