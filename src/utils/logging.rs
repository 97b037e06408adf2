//! Structured logging setup.
//!
//! Builds a `tracing-subscriber` registry from [`LoggingConfig`]: an env
//! filter (`RUST_LOG` wins over the configured level), a console layer and
//! an optional append-only file layer, each plain or JSON.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{ProxyError, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(LevelFilter::from_level(config.log_level).into())
    });

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.log_to_console {
        layers.push(if config.json_format {
            fmt::layer().json().with_target(true).boxed()
        } else {
            fmt::layer().with_target(true).boxed()
        });
    }

    if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            ProxyError::ConfigError("log_file_path must be set when log_to_file is true".into())
        })?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = Mutex::new(file);
        layers.push(if config.json_format {
            fmt::layer().json().with_writer(writer).boxed()
        } else {
            fmt::layer().with_ansi(false).with_writer(writer).boxed()
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ProxyError::ConfigError(format!("Failed to install subscriber: {e}")))?;

    info!(
        app = %config.app_name,
        level = %config.log_level,
        json = config.json_format,
        "Logging initialized"
    );
    Ok(())
}
