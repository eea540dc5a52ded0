use crate::clock::{Clock, SystemClock};
use crate::config::parse::load_config;
use crate::config::{Config, EmitterConfig};
use crate::pipeline::Emitter;
use crate::quota::{StaticQuotaQuerier, WebhookReporter};
use crate::record::AccessLogRecord;
use crate::service::Service;
use crate::storage::duckdb::DuckDbStorage;
use crate::storage::MemoryStorage;
use crate::web::{run_server, AppState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::traits::StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(String),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/logstore/config.yml");
            eprintln!("  /etc/logstore/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'logstore config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_pipeline(&config_path).await.map_err(|e| e.into())
}

async fn run_pipeline(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let service = Arc::new(build_service(&config, clock.clone()).await?);
    if !service.enabled() {
        info!("All sinks disabled, requests are neither logged nor limited");
    }

    let shutdown = CancellationToken::new();

    let driver_handle = service.spawn_driver(config.driver.tick_interval, shutdown.clone());

    info!("Starting web server on {}", config.web.listen);
    let state = AppState {
        service: service.clone(),
        clock,
    };
    let web_config = config.web.clone();
    let web_shutdown = shutdown.clone();
    let mut web_handle = tokio::spawn(async move {
        run_server(state, web_config, web_shutdown)
            .await
            .map_err(|e| RunError::WebServer(e.to_string()))
    });

    info!("Logstore started, press Ctrl+C to shutdown");

    let finished = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            None
        }
        result = &mut web_handle => Some(result),
    };
    shutdown.cancel();
    let web_result = match finished {
        Some(result) => result,
        None => web_handle.await,
    };

    // The driver flushes every sink once more before it returns.
    driver_handle.await?;

    match web_result {
        Ok(Ok(())) => info!("Web server stopped"),
        Ok(Err(e)) => {
            error!(error = %e, "Web server error");
            return Err(e);
        }
        Err(e) => return Err(e.into()),
    }

    info!("Shutdown complete");
    Ok(())
}

/// DuckDB backs the main sink, an in-memory store the secondary one.
pub async fn build_service(
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<Service<AccessLogRecord>, RunError> {
    let path = &config.storage.path;
    if path.as_os_str() != ":memory:" {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }

    info!(path = %path.display(), "Initializing storage");
    let main_storage = Arc::new(DuckDbStorage::new(path)?);
    main_storage.init_schema().await?;

    let secondary_config = config
        .sinks
        .secondary
        .clone()
        .unwrap_or_else(EmitterConfig::disabled);

    let emitters = vec![
        Emitter::new("main", clock.clone(), &config.sinks.main, main_storage),
        Emitter::new(
            "secondary",
            clock.clone(),
            &secondary_config,
            Arc::new(MemoryStorage::<AccessLogRecord>::new()),
        ),
    ];

    info!(quotas = config.quotas.len(), "Loaded quotas");
    let quota_querier = Arc::new(StaticQuotaQuerier::new(clock.clone(), config.quotas.clone()));

    Ok(Service::new(
        clock,
        emitters,
        quota_querier,
        Arc::new(WebhookReporter::default()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse::parse_config;

    #[tokio::test]
    async fn test_build_service_from_minimal_config() {
        let config = parse_config(
            "sinks:\n  main: {}\nstorage:\n  path: \":memory:\"\nweb:\n  listen: \"127.0.0.1:0\"\n",
        )
        .unwrap();

        let service = build_service(&config, Arc::new(SystemClock::new())).await.unwrap();
        assert!(service.enabled());
        assert!(service.emitters()[0].enabled());
        assert!(!service.emitters()[1].enabled());
        assert_eq!(service.limit("anyone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_build_service_creates_storage_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data/access.duckdb");
        let yaml = format!(
            "sinks:\n  main: {{}}\nstorage:\n  path: {}\nweb:\n  listen: \"127.0.0.1:0\"\n",
            db_path.display()
        );
        let config = parse_config(&yaml).unwrap();

        build_service(&config, Arc::new(SystemClock::new())).await.unwrap();
        assert!(db_path.exists());
    }
}
