use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower::make::Shared;
use tracing_subscriber::EnvFilter;

use eligibility::config::AppConfig;
use eligibility::db;
use eligibility::engine::client_specific::ClientSpecificRegistry;
use eligibility::engine::EligibilityService;
use eligibility::flags::FlagSet;
use eligibility::routes;
use eligibility::state::AppState;
use eligibility::store::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        environment = ?config.environment,
        client_specific = config.client_specific.len(),
        "loaded eligibility configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    db::run_migrations(&pool)?;

    let store = Arc::new(PgStore::new(pool));
    let flags = Arc::new(FlagSet::from_json(&config.feature_flags)?);
    let registry = Arc::new(ClientSpecificRegistry::from_config(&config)?);
    let service = EligibilityService::new(store, flags, registry, &config);

    let listen_addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    let state = AppState::new(config, service);
    let router = routes::create_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, Shared::new(router)).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
