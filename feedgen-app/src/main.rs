use anyhow::Result;
use clap::Parser;
use feedgen_common::observability::{LogConfig, LogFormat, init_logging};
use feedgen_config::{FeedgenConfig, FeedgenConfigLoader};
use std::path::PathBuf;

mod routes;
mod server;
mod wiring;

const DEFAULT_CONFIG_FILE: &str = "feedgen.yaml";

/// Bluesky feed generator serving posts about gay men's health.
#[derive(Parser, Debug)]
#[command(name = "feedgen", version, about)]
struct Cli {
    /// YAML config file. Without it `feedgen.yaml` is read when present.
    #[arg(long, env = "FEEDGEN_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address; overrides `HOST`.
    #[arg(long)]
    host: Option<String>,

    /// Listen port; overrides `PORT`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1) Config: file, then FEEDGEN__ env, then the deployment variables, then flags.
    let loader = FeedgenConfigLoader::new();
    let loader = match &cli.config {
        Some(path) => loader.with_file(path),
        None => loader.with_optional_file(DEFAULT_CONFIG_FILE),
    };
    let mut cfg: FeedgenConfig = loader.load()?;
    if let Some(host) = cli.host {
        cfg.server.host = host;
    }
    if let Some(port) = cli.port {
        cfg.server.port = port;
    }

    // 2) Logging from the merged config.
    let format = cfg
        .logging
        .format
        .as_deref()
        .and_then(LogFormat::parse)
        .unwrap_or(LogFormat::Text);
    let log_file = init_logging(LogConfig {
        app_name: "feedgen",
        log_dir: cfg.logging.dir.clone(),
        format: LogFormat::from_env_or(format),
        default_filter: cfg.logging.filter.clone(),
        ..LogConfig::default()
    })?;
    if let Some(path) = log_file {
        tracing::info!(path = %path.display(), "logging.file");
    }

    tracing::info!(config = %cfg.redacted_summary(), "startup.config");

    // 3) Credentials are the only mandatory settings.
    let credentials = cfg.credentials().inspect_err(|err| {
        tracing::error!(error = %err, "startup.missing_credentials");
    })?;

    let upstream = wiring::bluesky_upstream(credentials)?;
    let state = wiring::app_state(upstream, &cfg);

    server::serve(&cfg.server.host, cfg.server.port, routes::router(state)).await
}
