mod cmd;
mod modules;
mod types;

use crate::cmd::{
    fetch::{self, FetchArgs},
    import::{self, ImportArgs},
    server::{self, ServerArgs},
};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::{env, str::FromStr};
use tokio::runtime::Builder;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{self, time::OffsetTime},
};

#[derive(Debug, Parser)]
#[command(name = "leetcode_tracker")]
#[command(about = "LeetCode contest leaderboard tracker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Fetch(FetchArgs),
    Import(ImportArgs),
    Server(ServerArgs),
}

fn main() {
    dotenv().ok();

    let log_level = env::var("RUST_LOG").unwrap_or(String::from("info"));
    let filter = EnvFilter::builder()
        .with_default_directive(
            LevelFilter::from_str(&log_level)
                .expect("couldn't parse specified log level")
                .into(),
        )
        .from_env_lossy();
    let format = fmt::format()
        .with_level(true)
        .with_target(true)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_timer(OffsetTime::local_rfc_3339().unwrap());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(format)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    let runtime = Builder::new_multi_thread().enable_all().build().unwrap();

    match Cli::parse().command {
        Commands::Fetch(args) => runtime.block_on(fetch::run(args)),
        Commands::Import(args) => runtime.block_on(import::run(args)),
        Commands::Server(args) => runtime.block_on(server::run(args)),
    }
    .expect("command failed");
}
