mod analysis;
mod archival;
mod bogon;
mod config;
mod context;
mod control;
mod dns;
mod dnscache;
mod failure;
mod flows;
mod idgen;
mod measurer;
mod netx;
mod priority;
mod redirects;
mod resolvers;
mod testkeys;

use std::sync::Arc;
use tracing::{error, info};

use crate::config::{Config, LogConfig};
use crate::measurer::Measurer;
use crate::netx::SystemNetx;

fn init_tracing(log: &LogConfig) {
    // stdout carries the measurements
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log.filter.clone().into()),
        )
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config = match args.first() {
        Some(path) if path.ends_with(".toml") => {
            let path = args.remove(0);
            Config::load(&path)?
        }
        _ => Config::default(),
    };
    init_tracing(&config.log);

    if args.is_empty() {
        anyhow::bail!("usage: ooni-webconn [config.toml] <url> [<url>...]");
    }
    info!("🔎 ooni-webconn v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(config);
    let netx = SystemNetx::new(&config.http.user_agent)
        .map_err(|e| anyhow::anyhow!("Failed to set up the network stack: {}", e))?;
    let measurer = Measurer::new(config, Arc::new(netx));

    let mut failed = 0;
    for input in &args {
        match measurer.run(input).await {
            Ok((measurement, summary)) => {
                println!("{}", serde_json::to_string(&measurement)?);
                info!(
                    "✅ {}: summary {}",
                    input,
                    serde_json::to_string(&summary).unwrap_or_default()
                );
            }
            Err(e) => {
                error!("❌ {}: {}", input, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} measurements failed", failed, args.len());
    }
    Ok(())
}
