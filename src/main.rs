mod catalog;
mod config;
mod cookies;
mod credentials;
mod error;
mod extractor;
mod formats;
mod resolver;
mod routes;
mod track;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    catalog::CatalogClient,
    config::Settings,
    cookies::CookieSource,
    error::ApiError,
    extractor::YtDlp,
    formats::default_policy_chain,
    resolver::Resolver,
    routes::{AppState, build_cors_layer, build_router},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "aureum=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let settings = Settings::from_env();

    let cookies = CookieSource::new(&settings.cookies_source, &settings.cookies_scratch);
    if cookies.ensure_scratch_copy().await.is_some() {
        info!(
            "Cookie jar available from {}; stream requests run authenticated.",
            cookies.source_path().display()
        );
    } else {
        warn!("No cookie jar available; stream requests run unauthenticated.");
    }

    let catalog = match reqwest::Client::builder()
        .timeout(settings.catalog_timeout)
        .build()
    {
        Ok(http) => {
            info!("Catalog client initialized");
            Some(CatalogClient::new(http))
        }
        Err(error) => {
            warn!("Catalog client initialization failed: {error}");
            None
        }
    };

    let extractor = YtDlp::new(settings.yt_dlp_bin.clone(), settings.yt_dlp_timeout);
    let resolver = Resolver::new(
        Arc::new(extractor),
        settings.auth_origin.clone(),
        default_policy_chain(),
    );

    let state = AppState {
        catalog,
        resolver: Arc::new(resolver),
        cookies,
        auth_origin: settings.auth_origin.clone(),
        search_authenticated: settings.search_authenticated,
    };

    let cors = build_cors_layer(&settings.allowed_origins)?;
    let app = build_router(state, cors);

    let addr = settings.bind_addr;
    let listener = TcpListener::bind(&addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {addr}: {error}"))
    })?;

    info!("Aureum Music API listening on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
