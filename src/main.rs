use anyhow::Result;
use axum::Router;
use chrono::{Duration, Utc};
use std::{io::ErrorKind, sync::Arc, time::Duration as StdDuration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    blob_service::{BlobStore, ReleaseClient},
    catalog_service::CatalogService,
    session_service::SessionManager,
    uploader::{HttpTransport, UploadCoordinator},
    versioned_store::{MemoryStore, RemoteContentStore, VersionedStore},
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + client-mode flag ---
    let (cfg, job) = config::AppConfig::from_env_and_args()?;

    // --- Handle client mode ---
    if let Some(job) = job {
        return run_upload_job(job).await;
    }

    tracing::info!(
        addr = %cfg.addr(),
        repo = %cfg.repo,
        meta_prefix = %cfg.meta_prefix,
        "starting dropstore"
    );
    if cfg.token.is_empty() {
        tracing::warn!("no API token configured; blob and metadata writes will be rejected");
    }

    // --- Wire up services ---
    let store: Arc<dyn VersionedStore> = if cfg.repo.is_empty() {
        tracing::warn!("no repository configured; using an ephemeral in-memory metadata store");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(RemoteContentStore::new(
            &cfg.api_base,
            &cfg.repo,
            &cfg.branch,
            &cfg.token,
        )?)
    };
    let blob: Arc<dyn BlobStore> =
        Arc::new(ReleaseClient::new(&cfg.api_base, &cfg.repo, &cfg.token)?);
    let catalog = CatalogService::new(store, cfg.meta_prefix.clone());
    let sessions = SessionManager::new(Duration::seconds(cfg.session_ttl_secs));

    // --- Background expiry sweep ---
    {
        let sessions = sessions.clone();
        let every = StdDuration::from_secs(cfg.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                let removed = sessions.sweep_expired(Utc::now());
                if removed > 0 {
                    tracing::info!(removed, "swept expired upload sessions");
                }
            }
        });
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(AppState {
        sessions,
        catalog,
        blob,
    });

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Upload one local file through a running server and exit.
async fn run_upload_job(job: config::UploadJob) -> Result<()> {
    let data = tokio::fs::read(&job.file).await?;
    let file_name = job
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| "upload.bin".to_string());

    let transport = HttpTransport::new(&job.server)?;
    let coordinator = UploadCoordinator::new(transport);
    let asset = coordinator
        .upload(data.into(), &file_name, None, |progress| {
            if progress.finalized {
                tracing::info!("upload finalized");
            } else {
                tracing::info!(
                    sent = progress.sent_chunks,
                    total = progress.total_chunks,
                    "chunk accepted"
                );
            }
        })
        .await?;

    println!("{} ({} bytes) -> {}", asset.name, asset.size, asset.download_url);
    Ok(())
}
