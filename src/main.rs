//! Word Rush Game Server
//!
//! Authoritative server for Word Rush. Loads the word lists, then accepts
//! WebSocket clients until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use word_rush::{GameServer, ServerConfig, WordValidator, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Word Rush Server v{}", VERSION);

    let words_path = std::env::var("WORD_LIST").unwrap_or_else(|_| "data/words.txt".to_string());
    let combos_path = std::env::var("COMBO_LIST").unwrap_or_else(|_| "data/combos.txt".to_string());

    // No dictionary, no game: abort before accepting a single connection.
    let validator = Arc::new(
        WordValidator::from_files(&words_path, &combos_path)
            .context("loading word lists at boot")?,
    );
    info!(
        "loaded {} words, {} combos",
        validator.word_count(),
        validator.combo_count()
    );

    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("BIND_ADDR") {
        config.bind_addr = addr.parse().context("parsing BIND_ADDR")?;
    }

    let server = Arc::new(GameServer::new(config, validator));

    let ctrlc_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            ctrlc_server.shutdown();
        }
    });

    server.run().await.context("running game server")?;
    Ok(())
}
