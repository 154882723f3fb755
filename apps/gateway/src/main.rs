use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crosslink_gateway::bot::LogBotGateway;
use crosslink_gateway::config::Config;
use crosslink_gateway::storage::MemoryAccountStore;
use crosslink_gateway::{net, GatewayState};

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    // In-memory store for standalone runs; seedable via
    // CROSSLINK_SEED_ACCOUNT="name:key:guild_id".
    let storage = Arc::new(MemoryAccountStore::new());
    if let Ok(seed) = std::env::var("CROSSLINK_SEED_ACCOUNT") {
        match parse_seed(&seed) {
            Some((name, key, guild_id)) => {
                let id = storage.insert_account(name, key, guild_id);
                tracing::info!(account = name, account_id = id, guild_id, "seeded account");
            }
            None => tracing::warn!(%seed, "ignoring malformed CROSSLINK_SEED_ACCOUNT"),
        }
    }

    let bot = Arc::new(LogBotGateway);

    tracing::info!(
        bind = %config.bind_addr,
        port = config.port,
        update_interval_ms = config.update_interval_ms,
        "gateway configured"
    );

    let state = GatewayState::new(config, storage, bot);

    tokio::select! {
        result = net::listener::run(state.clone()) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "listener failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            state.set_closed(true);
            state.sessions.kick_all("server shutdown");
        }
    }
}

fn parse_seed(seed: &str) -> Option<(&str, &str, i64)> {
    let mut parts = seed.splitn(3, ':');
    let name = parts.next()?;
    let key = parts.next()?;
    let guild_id = parts.next()?.parse().ok()?;
    Some((name, key, guild_id))
}
