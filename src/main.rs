use std::env;

use log::{error, info};
use room_sync::{ChatSession, Identity, LoggingObserver, SessionConfig, WebSocketConnector};

fn identity_from_env() -> Option<Identity> {
    let token = env::var("ROOM_SYNC_TOKEN").ok()?;
    let user_id = env::var("ROOM_SYNC_USER_ID").unwrap_or_default();
    Some(Identity::new(token, user_id))
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = SessionConfig::from_env();
    info!("Using chat server {}", config.server_url);

    let session = ChatSession::with_observer(
        config,
        identity_from_env(),
        WebSocketConnector::new(),
        Some(Box::new(LoggingObserver)),
    );

    if let Err(e) = session.connect() {
        error!("Cannot start session: {}", e);
        std::process::exit(1);
    }

    if let Ok(room) = env::var("ROOM_SYNC_ROOM") {
        session.select_room(&room);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Shutting down");
    session.shutdown().await;
}
