use clap::Parser;
use std::{future::IntoFuture, time::Duration};
use tracing::{error, info};

use crate::{
    config::{Config, StartArgs},
    error::PartdeskError,
    live::feed::ChangeFeed,
    state::AppState,
};

pub mod actions;
pub mod auth;
pub mod billing;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod i18n;
pub mod live;
pub mod org;
pub mod parts;
pub mod project;
pub mod router;
pub mod state;

const SWEEP_EVERY: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), PartdeskError> {
    dotenv::dotenv().ok();
    let StartArgs {
        config_path,
        address: host,
        port,
        log_level: level,
    } = StartArgs::parse();

    tracing_subscriber::fmt().with_max_level(level).init();

    let config = Config::read(&config_path)?;

    let db_url = Config::database_url()?;
    let db_pool = db::create_pool(&db_url).await?;

    db::migrate(&db_pool).await?;

    let feed = ChangeFeed::new();
    let feed_task = feed.listen(db_pool.clone(), config.feed.clone());

    let state = AppState::new(db_pool, config, feed);
    let sweeper = state.live.sweep(SWEEP_EVERY);

    let addr = format!("{host}:{port}");
    info!("Now listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let result = tokio::select! {
        served = axum::serve(listener, router::router(state)).into_future() => served.map_err(PartdeskError::from),
        exited = feed_task => {
            error!("Change feed listener stopped");
            exited?;
            Err(PartdeskError::Remote("change feed listener stopped".to_string()))
        }
    };

    sweeper.abort();
    result
}
