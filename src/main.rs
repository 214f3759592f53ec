//! MyPath API server
//!
//! Starts the REST API over the Sled store.
//! - Auth: API-key gated register/login, bearer tokens for protected routes
//! - Resources: visions > goals > tasks, each scoped to its parent id
//! - AI: task breakdown through an OpenAI-compatible completion endpoint
//!
//! Usage:
//!   cargo run --bin load_data    # seed a demo account
//!   cargo run --bin mypath_api   # start server
//!   # Swagger UI at http://localhost:8080/api-docs

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mypath_api::ai::OpenAiProvider;
use mypath_api::config::{Config, LogConfig, LogFormat};
use mypath_api::rest::{create_router, AppState};
use mypath_api::storage::Storage;

/// Installs the global subscriber. The guard must live as long as the
/// process when logging to a file.
fn init_tracing(log: &LogConfig) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mypath_api=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    match &log.file {
        Some(path) => {
            let dir = path.parent().unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("mypath-api.log");
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name));
            match log.format {
                LogFormat::Json => registry
                    .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                    .init(),
                LogFormat::Text => registry
                    .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                    .init(),
            }
            Some(guard)
        }
        None => {
            match log.format {
                LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
                LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
            }
            None
        }
    }
}

/// Resolves once `signal` reports a shutdown request. If the signal handler
/// could not be installed the server keeps running instead of stopping.
async fn shutdown_on(signal: impl Future<Output = std::io::Result<()>>) {
    match signal.await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => {
            error!(error = %err, "cannot listen for ctrl-c, graceful shutdown disabled");
            std::future::pending::<()>().await
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let _log_guard = init_tracing(&config.log);

    info!(
        addr = %config.bind_addr,
        data_dir = %config.data_dir.display(),
        model = %config.provider.model,
        "MyPath API starting"
    );

    let storage = Storage::open(&config.data_dir)?;
    let provider = OpenAiProvider::new(&config.provider)?;
    let state = AppState::new(&config, storage.clone(), Arc::new(provider));
    let app = create_router(state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("listening on http://{}", config.bind_addr);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_on(tokio::signal::ctrl_c()))
        .await?;

    storage.flush()?;
    info!("storage flushed, bye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_waits_for_the_signal() {
        let signalled = shutdown_on(async { Ok(()) });
        assert!(tokio::time::timeout(Duration::from_millis(200), signalled).await.is_ok());

        let broken = shutdown_on(async {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no signal driver"))
        });
        assert!(tokio::time::timeout(Duration::from_millis(50), broken).await.is_err());
    }
}
