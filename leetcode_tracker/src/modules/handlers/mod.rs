pub mod automation;
pub mod leaderboard;

use axum::{extract::Extension, http::StatusCode};
use sqlx::{postgres::Postgres, Pool};

pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

pub async fn readiness(Extension(pool): Extension<Pool<Postgres>>) -> StatusCode {
    match sqlx::query("SELECT 1;").execute(&pool).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::error!("readiness check failed: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
