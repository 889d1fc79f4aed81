use anyhow::Context;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use inventory_api::{
    app_router, build_backends, config, db, events::EventPublisher,
    services::reservations::spawn_sweeper, AppServices, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load_config().context("failed to load configuration")?;
    config::init_tracing(&config);

    info!("inventory service starting");

    let db = db::establish_connection(&config)
        .await
        .context("failed to connect to database")?;
    db::init_schema(&db)
        .await
        .context("failed to initialize database schema")?;
    let db = Arc::new(db);

    let (bus, lock) = build_backends(&config)
        .await
        .context("failed to initialize lock service and event bus")?;
    let publisher = EventPublisher::new(bus, db.clone(), config.event_topic.clone());

    let services = AppServices::new(db.clone(), lock, publisher.clone(), &config);

    let _sweeper = spawn_sweeper(
        services.reservations.clone(),
        Duration::from_secs(config.sweeper_interval_seconds),
    );

    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("invalid host address: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);

    let state = AppState {
        db,
        config,
        services,
        publisher,
        started_at: Instant::now(),
    };
    let app = app_router(state);

    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
