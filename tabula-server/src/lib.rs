mod apis;
mod catalog;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use poem::listener::TcpListener;
use poem::Route;
use poem_openapi::OpenApiService;
use tabula_core::{EngineConfig, QueryEngine};
use tracing::info;

pub use crate::catalog::{Catalog, CatalogError};
use crate::apis::{HealthApi, InfoApi, QueryApi, TablesApi};

/// Runs the tabula server.
///
/// Every `*.csv` file within the data path is loaded as a table before the
/// API starts accepting requests.
pub async fn run(
    listen_address: SocketAddr,
    data_path: PathBuf,
    config: EngineConfig,
) -> Result<()> {
    let engine = Arc::new(QueryEngine::new(config));
    let catalog = Catalog::open(data_path.clone(), engine)
        .await
        .with_context(|| format!("Load tables from {}", data_path.display()))?;

    run_rest_api(listen_address, Arc::new(catalog))
        .await
        .context("Run tabula REST API")?;

    Ok(())
}

async fn run_rest_api(listen_address: SocketAddr, catalog: Arc<Catalog>) -> Result<()> {
    let api = (
        HealthApi,
        InfoApi::new(catalog.clone()),
        QueryApi::new(catalog.clone()),
        TablesApi::new(catalog),
    );

    let api_service =
        OpenApiService::new(api, "tabula REST API", env!("CARGO_PKG_VERSION"));
    let ui = api_service.redoc();
    let app = Route::new()
        .nest("/api/v0", api_service)
        .nest("/api/docs", ui);

    info!(listen_addr = %listen_address, "Service API is running");
    poem::Server::new(TcpListener::bind(listen_address))
        .run_with_graceful_shutdown(
            app,
            tabula_common::signal_handler::wait_shutdown_signal()?,
            Some(Duration::from_secs(5)),
        )
        .await?;

    Ok(())
}
