use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;

use magic_math::cache::{self, CachePolicy};
use magic_math::config::{Config, LogFormat};
use magic_math::engine::RecurrenceEngine;
use magic_math::lookup::CacheFrontedLookup;
use magic_math::{Server, api, telemetry};

#[derive(Parser, Debug)]
#[command(name = "magic-math", version, about = "Serves f(n) = f(n-1) + f(n-2) + n over HTTP")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Redis connection URL
    #[arg(long, value_name = "URL")]
    redis_url: Option<String>,

    /// Run without the external cache
    #[arg(long)]
    no_cache: bool,

    /// What to do when the cache errors: fail-open or fail-fast
    #[arg(long, value_name = "POLICY")]
    cache_policy: Option<CachePolicy>,

    /// Log output format: text or json
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = self.redis_url {
            config.cache.url = url;
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        if let Some(policy) = self.cache_policy {
            config.cache.policy = policy;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::resolve(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    config.validate()?;

    telemetry::init(&config.logging);

    let cache = cache::connect(&config.cache)
        .await
        .context("connecting to the external cache")?;
    info!(
        backend = cache.name(),
        policy = %config.cache.policy,
        "external cache ready"
    );

    let lookup = CacheFrontedLookup::new(Arc::new(RecurrenceEngine::new()), cache)
        .policy(config.cache.policy)
        .timeout(config.cache.timeout());
    let router = api::router(Arc::new(lookup), &config);

    let server = Server::bind(config.server.address()).await?;
    server.serve(router, shutdown_signal()).await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
