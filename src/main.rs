//! dynhtml: runs the API listener, the edge listener, or both.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use dynhtml::config::Config;
use dynhtml::edge::{Edge, HttpOrigin, LocalOrigin, Origin};
use dynhtml::endpoint::ApiEndpoint;
use dynhtml::store::{ConfigurationStore, INITIAL_VALUE, JsonFileStore, MemoryStore};
use dynhtml::{Request, Server};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// API and edge listeners in one process.
    All,
    Api,
    Edge,
}

/// Dynamic HTML endpoint behind an edge cache.
#[derive(Parser, Debug)]
#[command(name = "dynhtml")]
#[command(about = "Dynamic HTML endpoint behind an edge cache", long_about = None)]
struct Args {
    /// Which listeners to start.
    #[arg(long, value_enum, env = "DYNHTML_MODE", default_value_t = Mode::All)]
    mode: Mode,

    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn ConfigurationStore> = match &config.parameter_store_file {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(MemoryStore::with_entry(&config.parameter_name, INITIAL_VALUE)),
    };
    let endpoint = ApiEndpoint::new(store, config.endpoint_settings());

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut servers = JoinSet::new();

    if args.mode != Mode::Edge {
        let server = Server::bind(&config.api_bind_addr)
            .await?
            .idle_timeout(config.idle_timeout);
        tracing::info!(addr = %server.local_addr(), "api listener ready");
        let pipeline = endpoint.pipeline();
        servers.spawn(server.run_until(
            move |req: Request| {
                let pipeline = pipeline.clone();
                async move { pipeline.run(req).await }
            },
            stopped(stop_rx.clone()),
        ));
    }

    if args.mode != Mode::Api {
        let origin: Arc<dyn Origin> = match &config.edge_origin_url {
            Some(url) => Arc::new(HttpOrigin::new(
                url,
                config.edge_origin_protocol,
                config.edge_origin_timeout,
            )?),
            None => Arc::new(LocalOrigin::new(endpoint.clone())),
        };
        let edge = Edge::new(origin, config.edge_settings());

        let server = Server::bind(&config.edge_bind_addr)
            .await?
            .idle_timeout(config.idle_timeout);
        tracing::info!(addr = %server.local_addr(), "edge listener ready");
        servers.spawn(server.run_until(
            move |req: Request| {
                let edge = edge.clone();
                async move { edge.handle(req).await }
            },
            stopped(stop_rx.clone()),
        ));
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutdown requested");
        }
        Some(joined) = servers.join_next() => {
            joined??;
            tracing::warn!("a listener stopped unexpectedly");
        }
    }

    let _ = stop_tx.send(true);
    while let Some(joined) = servers.join_next().await {
        joined??;
    }

    Ok(())
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
