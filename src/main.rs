//! Duel Lobby Server
//!
//! Binds the lobby to `LOBBY_BIND_ADDR` (default `0.0.0.0:55555`) and runs
//! until Ctrl-C. See `ServerConfig::from_env` and `AuthConfig::from_env` for
//! the environment variables read at startup.

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use duel_lobby::{
    lobby::RandomResolver,
    network::{auth::DEMO_USERNAME, AuthConfig, CredentialStore, LobbyServer, ServerConfig},
    VERSION,
};

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Duel Lobby Server v{}", VERSION);

    let config = ServerConfig::from_env().context("invalid server configuration")?;

    let auth_config = AuthConfig::from_env();
    let credentials =
        CredentialStore::from_config(&auth_config).context("failed to load accounts")?;
    if auth_config.is_configured() {
        info!("Loaded {} accounts", credentials.len());
    } else {
        warn!(
            "LOBBY_ACCOUNTS_FILE not set, only the demo account '{}' can log in",
            DEMO_USERNAME
        );
    }

    let resolver = match std::env::var("LOBBY_OUTCOME_SEED") {
        Ok(seed) => {
            let seed: u64 = seed
                .trim()
                .parse()
                .with_context(|| format!("invalid LOBBY_OUTCOME_SEED {:?}", seed))?;
            info!("Match outcomes seeded with {}", seed);
            RandomResolver::with_seed(seed)
        }
        Err(_) => RandomResolver::from_entropy(),
    };

    // One thread drives every socket and the lobby state
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(async move {
        let server = LobbyServer::new(config, credentials, resolver);
        let shutdown = server.shutdown_handle();

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, shutting down");
                    shutdown.shutdown();
                }
                Err(e) => warn!("Could not listen for Ctrl-C: {}", e),
            }
        });

        server.run().await.context("lobby server failed")
    })
}
