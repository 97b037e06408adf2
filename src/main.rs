use std::sync::Arc;

use game_proxy::config::ProxyConfig;
use game_proxy::core::crypto::NullCipher;
use game_proxy::error::{ProxyError, Result};
use game_proxy::mods::{FactoryLoader, ModCatalog};
use game_proxy::protocol::DataDirProvider;
use game_proxy::server::{self, SharedState};
use game_proxy::utils::logging::init_logging;
use game_proxy::utils::metrics::init_metrics;
use tracing::{info, warn};

fn load_config() -> Result<ProxyConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let mut config = ProxyConfig::from_file(path)?;
            config.apply_env();
            Ok(config)
        }
        None => ProxyConfig::from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    let (warnings, errors): (Vec<_>, Vec<_>) = config
        .validate()
        .into_iter()
        .partition(|e| e.starts_with("WARNING:"));
    if !errors.is_empty() {
        return Err(ProxyError::ConfigError(format!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        )));
    }

    init_logging(&config.logging)?;
    for warning in &warnings {
        warn!("{warning}");
    }
    init_metrics();

    let provider = DataDirProvider::new(&config.protocol.data_dir)?;

    let mut catalog = ModCatalog::new();
    catalog.scan(&config.mods.directory)?;

    info!(
        listen = %config.server.listen_address,
        upstream = %config.server.upstream_address,
        modules = catalog.len(),
        "Starting {}",
        config.logging.app_name
    );

    let shared = SharedState {
        provider: Arc::new(provider),
        catalog: catalog.shared(),
        loader: Arc::new(FactoryLoader::new()),
        cipher: Arc::new(NullCipher),
    };

    server::run(config, shared).await
}
