use crate::{
    cmd::TriggerKind,
    modules::contests::fetcher::{ContestFetcher, ContestSummary},
};
use anyhow::Result;
use axum::{extract::Extension, http::StatusCode, Json};
use leetcode_tracker_libs::api::AutomationResponse;
use sqlx::{postgres::Postgres, Pool};

pub async fn trigger_manual(
    Extension(pool): Extension<Pool<Postgres>>,
) -> (StatusCode, Json<AutomationResponse<ContestSummary>>) {
    run_trigger(TriggerKind::Manual, pool).await
}

pub async fn trigger_weekly(
    Extension(pool): Extension<Pool<Postgres>>,
) -> (StatusCode, Json<AutomationResponse<ContestSummary>>) {
    run_trigger(TriggerKind::Weekly, pool).await
}

pub async fn trigger_biweekly(
    Extension(pool): Extension<Pool<Postgres>>,
) -> (StatusCode, Json<AutomationResponse<ContestSummary>>) {
    run_trigger(TriggerKind::Biweekly, pool).await
}

/// 手動・週次・隔週の各トリガーが共通で呼ぶ処理。
/// 自動収集を1回実行し、結果をエンベロープに包んで返す。
async fn run_trigger(
    kind: TriggerKind,
    pool: Pool<Postgres>,
) -> (StatusCode, Json<AutomationResponse<ContestSummary>>) {
    tracing::info!("{} automation trigger requested.", kind);

    let response = match automation(kind, &pool).await {
        Ok(summaries) => AutomationResponse::succeeded(kind, summaries),
        Err(e) => {
            tracing::error!("{} automation failed: {:?}", kind, e);
            AutomationResponse::failed(kind, format!("{:#}", e))
        }
    };

    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (status, Json(response))
}

async fn automation(kind: TriggerKind, pool: &Pool<Postgres>) -> Result<Vec<ContestSummary>> {
    let fetcher = ContestFetcher::new(pool)?;
    fetcher.run_automation(kind).await
}
