use crate::{modules::migration::MIGRATOR, types::tables::TargetUser};
use anyhow::{Context, Result};
use clap::Args;
use sqlx::{postgres::Postgres, Pool};
use std::{env, path::PathBuf};
use tokio::fs;

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// 追跡対象ユーザ一覧のJSONファイル
    path: PathBuf,
}

pub async fn run(args: ImportArgs) -> Result<()> {
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

    let raw = fs::read_to_string(&args.path)
        .await
        .with_context(|| format!("failed to read target user file {:?}", args.path))?;
    let users: Vec<TargetUser> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse target user file {:?}", args.path))?;

    save(&pool, &users).await?;

    tracing::info!("{} target users successfully imported.", users.len());

    Ok(())
}

/// 追跡対象ユーザをデータベースへ保存する関数
///
/// leetcode_idの存在判定でUPDATE/INSERTを分けるMERGE INTO文(PostgreSQL 15から)を使用している
async fn save(pool: &Pool<Postgres>, users: &Vec<TargetUser>) -> Result<()> {
    let mut tx = pool.begin().await.with_context(|| {
        let message = "failed to start transaction";
        tracing::error!(message);
        message
    })?;

    for user in users.iter() {
        let result = sqlx::query(
            r#"
            MERGE INTO "target_users"
            USING
                (VALUES($1, $2, $3, $4, $5)) AS "user"("leetcode_id", "display_name", "academic_year", "department", "section")
            ON
                "target_users"."leetcode_id" = "user"."leetcode_id"
            WHEN MATCHED THEN
                UPDATE SET (
                    "display_name",
                    "academic_year",
                    "department",
                    "section"
                ) = (
                    "user"."display_name",
                    "user"."academic_year",
                    "user"."department",
                    "user"."section"
                )
            WHEN NOT MATCHED THEN
                INSERT ("leetcode_id", "display_name", "academic_year", "department", "section")
                VALUES ("user"."leetcode_id", "user"."display_name", "user"."academic_year", "user"."department", "user"."section");
            "#,
        )
        .bind(&user.leetcode_id)
        .bind(&user.display_name)
        .bind(&user.academic_year)
        .bind(&user.department)
        .bind(&user.section)
        .execute(&mut tx)
        .await;

        if let Err(e) = result {
            let message = format!("an error occurred at saving {:?}: [{:?}]", user.leetcode_id, e);
            tracing::error!(message);
            tx.rollback().await?;
            anyhow::bail!(message);
        }
    }

    tx.commit().await?;

    Ok(())
}
