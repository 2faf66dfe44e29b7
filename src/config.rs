use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Base URL of the hosting service's REST API.
    pub api_base: String,
    /// `owner/name` of the repository holding blobs and metadata.
    pub repo: String,
    /// Branch the metadata objects live on.
    pub branch: String,
    /// API token for blob and metadata writes.
    pub token: String,
    /// Object-path prefix for catalog objects (index, shards, views, groups).
    pub meta_prefix: String,
    /// Idle seconds before an in-flight upload session is swept.
    pub session_ttl_secs: i64,
    /// Seconds between expiry sweeps.
    pub sweep_interval_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Upload coordination and metadata store")]
pub struct Args {
    /// Host to bind to (overrides DROPSTORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DROPSTORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// API base URL of the blob/content host (overrides DROPSTORE_API_BASE)
    #[arg(long)]
    pub api_base: Option<String>,

    /// Repository holding blobs and metadata (overrides DROPSTORE_REPO)
    #[arg(long)]
    pub repo: Option<String>,

    /// Branch for metadata objects (overrides DROPSTORE_BRANCH)
    #[arg(long)]
    pub branch: Option<String>,

    /// API token (overrides DROPSTORE_TOKEN)
    #[arg(long)]
    pub token: Option<String>,

    /// Catalog object prefix (overrides DROPSTORE_META_PREFIX)
    #[arg(long)]
    pub meta_prefix: Option<String>,

    /// Upload the given file through a running dropstore server and exit
    #[arg(long)]
    pub send: Option<PathBuf>,

    /// Server base URL for --send (e.g. http://localhost:3000)
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    pub server: String,
}

/// One-shot client mode: drive an upload through a running server.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub file: PathBuf,
    pub server: String,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and an
    /// optional client-mode upload job.
    pub fn from_env_and_args() -> Result<(Self, Option<UploadJob>)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("DROPSTORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("DROPSTORE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing DROPSTORE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading DROPSTORE_PORT"),
        };
        let env_api_base =
            env::var("DROPSTORE_API_BASE").unwrap_or_else(|_| "https://api.github.com".into());
        let env_repo = env::var("DROPSTORE_REPO").unwrap_or_default();
        let env_branch = env::var("DROPSTORE_BRANCH").unwrap_or_else(|_| "main".into());
        let env_token = env::var("DROPSTORE_TOKEN").unwrap_or_default();
        let env_prefix = env::var("DROPSTORE_META_PREFIX").unwrap_or_else(|_| "meta/".into());

        let session_ttl_secs = match env::var("DROPSTORE_SESSION_TTL_SECS") {
            Ok(value) => value
                .parse::<i64>()
                .with_context(|| format!("parsing DROPSTORE_SESSION_TTL_SECS value `{}`", value))?,
            Err(_) => crate::services::session_service::SESSION_TTL_SECS,
        };
        let sweep_interval_secs = match env::var("DROPSTORE_SWEEP_INTERVAL_SECS") {
            Ok(value) => value.parse::<u64>().with_context(|| {
                format!("parsing DROPSTORE_SWEEP_INTERVAL_SECS value `{}`", value)
            })?,
            Err(_) => crate::services::session_service::SWEEP_INTERVAL_SECS,
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            api_base: args.api_base.unwrap_or(env_api_base),
            repo: args.repo.unwrap_or(env_repo),
            branch: args.branch.unwrap_or(env_branch),
            token: args.token.unwrap_or(env_token),
            meta_prefix: args.meta_prefix.unwrap_or(env_prefix),
            session_ttl_secs,
            sweep_interval_secs,
        };
        let job = args.send.map(|file| UploadJob {
            file,
            server: args.server,
        });

        Ok((cfg, job))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
