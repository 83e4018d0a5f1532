// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ffio::{init_metrics, NativeEngine, Relay, RelayConfig, RelayStats};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // FFIO_LOG_FORMAT=json for log shippers
    let json_logs = std::env::var("FFIO_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ffio=info,ffio_relay=info".into()),
        )
        .with(json_logs.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stdout)
        }))
        .with((!json_logs).then(|| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(false)
        }))
        .init();

    info!("ffio relay starting...");

    let metrics_handle = init_metrics()?;
    info!("Prometheus metrics initialized");

    let config = RelayConfig::from_env()?;
    info!(?config, "Relay configuration loaded");

    let engine = NativeEngine::load().context("Failed to load the ffio engine library")?;
    info!(?engine, "ffio engine loaded");

    let stop = Arc::new(AtomicBool::new(false));
    let signal_stop = Arc::clone(&stop);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping relay");
                signal_stop.store(true, Ordering::Relaxed);
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let worker = tokio::task::spawn_blocking(move || -> anyhow::Result<RelayStats> {
        let mut relay = Relay::open(&engine, config)?;
        let stats = relay.run(&stop);
        relay.release();
        stats
    });

    let stats = worker.await.context("Relay worker panicked")??;
    info!(
        decoded = stats.frames_decoded,
        encoded = stats.frames_encoded,
        failed = stats.encode_failures,
        "Relay finished"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    info!("Final metrics:\n{}", metrics_handle.render());

    Ok(())
}
