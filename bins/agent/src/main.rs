//! sdnagent - declarative network emulation agent.
//!
//! Serves the network model over HTTP and keeps the host configured after it.

mod api;

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sdn::agent::Agent;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "sdnagent",
    version,
    about = "Network emulation agent configured through a declarative network model"
)]
struct Cli {
    /// Set debug log level.
    #[arg(long)]
    debug: bool,

    /// Port on which to listen.
    #[arg(long, default_value_t = 6666)]
    port: u16,

    /// IP address on which to listen (all addresses by default).
    #[arg(long)]
    ip: Option<IpAddr>,

    /// Seconds between observations of the physical interfaces.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    refresh_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let agent = Agent::netlink();
    match agent.bootstrap().await {
        Ok(status) if !status.config_errors.is_empty() => tracing::warn!(
            failed = status.config_errors.len(),
            "host connectivity partially configured"
        ),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "failed to configure host connectivity"),
    }

    let refresher = agent.clone();
    let interval = Duration::from_secs(cli.refresh_interval);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = refresher.refresh().await {
                tracing::error!(error = %e, "failed to refresh current state");
            }
        }
    });

    let addr = SocketAddr::new(cli.ip.unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED)), cli.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, api::router(agent))
        .await
        .context("HTTP server terminated")?;
    Ok(())
}
