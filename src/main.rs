use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lgtm_relay::agent::{AgentConfig, AgentError, ApproverAgent};
use lgtm_relay::config::{self, Config};
use lgtm_relay::github::GithubClient;
use lgtm_relay::relay::{self, Relay, RelayConfig};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    init_tracing(cfg.log_json);

    let args = cli::Cli::parse();
    let result = match args.command {
        cli::Commands::Server { addr } => run_server(cfg, addr).await,
        cli::Commands::Client {
            server_url,
            reconnect_interval,
            ping_interval,
        } => {
            run_client(
                cfg,
                server_url,
                Duration::from_secs(reconnect_interval),
                Duration::from_secs(ping_interval),
            )
            .await
        }
    };

    if let Err(ref e) = result {
        tracing::error!(error = ?e, "exiting");
    }
    result
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "lgtm_relay=debug,lgtm=debug,tower_http=info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_server(cfg: Config, addr: SocketAddr) -> anyhow::Result<()> {
    if cfg.api_auth_token.is_none() {
        tracing::warn!("LGTM_API_AUTH_TOKEN is not set; relay accepts unauthenticated agents");
    }

    let relay = Arc::new(Relay::new(RelayConfig {
        auth_token: cfg.api_auth_token,
        request_timeout: cfg.request_timeout,
    }));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("lgtm relay listening on {}", addr);

    {
        let relay = relay.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                relay.shutdown();
            }
        });
    }

    relay::serve(listener, relay).await?;
    tracing::info!("relay stopped");
    Ok(())
}

async fn run_client(
    cfg: Config,
    server_url: String,
    reconnect_interval: Duration,
    ping_interval: Duration,
) -> anyhow::Result<()> {
    let github_token = cfg.require_github_token()?;
    let backend = GithubClient::new(github_token, Some(cfg.github_api_url.as_str()))
        .with_approval_message(cfg.approval_message.clone());

    let agent_config = AgentConfig {
        auth_token: cfg.api_auth_token.clone(),
        reconnect_interval,
        ping_interval,
        ..AgentConfig::new(server_url)
    };
    let agent = ApproverAgent::new(agent_config, Arc::new(backend));

    let token = agent.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            token.cancel();
        }
    });

    match agent.run().await {
        Ok(()) => Ok(()),
        Err(AgentError::Unauthorized) => {
            anyhow::bail!("relay rejected LGTM_API_AUTH_TOKEN; check that it matches the server")
        }
        Err(e) => Err(e.into()),
    }
}
