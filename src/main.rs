use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use tripro::{
    api::{self, AppState},
    auth::AuthState,
    config::{CliArgs, Command, Config, StorageKind},
    security::hash_password,
    Books, InMemoryStorage, SqliteStorage, StorageBackend,
};

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn open_storage(config: &Config) -> Result<Arc<dyn StorageBackend>, Box<dyn std::error::Error>> {
    Ok(match config.storage.backend {
        StorageKind::Memory => {
            tracing::warn!("using in-memory storage; data is lost on shutdown");
            Arc::new(InMemoryStorage::new())
        }
        StorageKind::Sqlite => {
            let path = config.storage.sqlite_path();
            tracing::info!(path, "opening sqlite storage");
            Arc::new(SqliteStorage::new(path)?)
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();

    if let Some(Command::HashPassword { password }) = &cli.command {
        println!("{}", hash_password(password));
        return Ok(());
    }

    let config = Config::load(&cli);
    init_logging(&config);

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics exporter disabled");
            None
        }
    };

    let books = Books::new(open_storage(&config)?);
    if config.storage.seed_default_chart && books.accounts()?.is_empty() {
        let created = books.install_default_chart()?;
        tracing::info!(created, "default chart of accounts installed");
    }
    let missing = books.missing_system_accounts()?;
    if !missing.is_empty() {
        tracing::warn!(count = missing.len(), "system accounts are not configured");
    }

    if config.auth.enabled && config.auth.api_keys.is_empty() && config.auth.users.is_empty() {
        tracing::warn!("auth is enabled but no API keys or users are configured");
    }

    let state = AppState::new(books, AuthState::new(config.auth.clone()));
    let app = api::router(state, metrics);

    let addr = config.listen_addr()?;
    tracing::info!(%addr, "TriPro Books API listening");

    axum::Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}
