use crate::modules::{
    handlers::{
        automation::{trigger_biweekly, trigger_manual, trigger_weekly},
        leaderboard::{contest_leaderboard, leaderboard_summary},
        liveness, readiness,
    },
    migration::MIGRATOR,
};
use anyhow::{Context, Result};
use axum::{extract::Extension, routing, Router, Server};
use clap::Args;
use sqlx::{postgres::Postgres, Pool};
use std::{env, net::SocketAddr};
use tower_http::cors::{Any, CorsLayer};

#[derive(Debug, Args)]
pub struct ServerArgs {
    #[arg(long)]
    port: Option<u16>,
}

pub async fn run(args: ServerArgs) -> Result<()> {
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

    let app = create_router(pool);
    let port = match args.port {
        Some(port) => port,
        None => {
            tracing::warn!("API server will be launched at default port number 8000");
            8000u16
        }
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server start at port {}", port);
    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to bind server.");

    Ok(())
}

fn create_router(pool: Pool<Postgres>) -> Router {
    Router::new()
        .route("/api/automation/trigger", routing::post(trigger_manual))
        .route("/api/automation/weekly", routing::post(trigger_weekly))
        .route("/api/automation/biweekly", routing::post(trigger_biweekly))
        .route("/api/leaderboard/summary", routing::get(leaderboard_summary))
        .route(
            "/api/leaderboard/contests/:contest_id",
            routing::get(contest_leaderboard),
        )
        .route("/api/liveness", routing::get(liveness))
        .route("/api/readiness", routing::get(readiness))
        .layer(Extension(pool))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler.");
    };

    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("SIGINT signal received, starting graceful shutdown.");
}

#[cfg(test)]
mod test {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use tower::ServiceExt;

    fn lazy_router() -> Router {
        // 実際には接続しないプールでルーティングだけを検証する
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost:5432/leetcode_tracker_test")
            .unwrap();
        create_router(pool)
    }

    #[tokio::test]
    async fn manual_trigger_rejects_non_post() {
        let app = lazy_router();

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/api/automation/trigger")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(header::ALLOW).unwrap(), "POST");
    }

    #[tokio::test]
    async fn leaderboard_summary_rejects_post() {
        let app = lazy_router();

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/leaderboard/summary")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let allow = response.headers().get(header::ALLOW).unwrap();
        assert!(allow.to_str().unwrap().contains("GET"));
    }

    #[tokio::test]
    async fn unknown_route_returns_not_found() {
        let app = lazy_router();

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/api/unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
