//! Collect command implementation.

use msglog_collector::{Collector, CollectorConfig, CollectorControl};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};

/// Runs a collector until Ctrl-C. On Unix, SIGHUP rolls the log.
pub fn run(
    logdir: Option<PathBuf>,
    config: Option<PathBuf>,
    tcp: Option<SocketAddr>,
    udp: Option<SocketAddr>,
    segment_size_mb: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config {
        Some(path) => CollectorConfig::load(path)?,
        None => CollectorConfig::default(),
    };
    if let Some(logdir) = logdir {
        config.storage.logdir = logdir;
    }
    if let Some(addr) = tcp {
        config = config.with_tcp_addr(addr);
    }
    if let Some(addr) = udp {
        config = config.with_udp_addr(addr);
    }
    if let Some(mb) = segment_size_mb {
        config.storage = config.storage.with_segment_size(mb * 1024 * 1024);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: CollectorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let logdir = config.storage.logdir.clone();
    let collector = Collector::bind(config).await?;
    info!(
        logdir = %logdir.display(),
        tcp = %collector.local_addr()?,
        udp = ?collector.udp_addr(),
        "collector listening"
    );

    tokio::spawn(handle_signals(collector.control()));

    let stats = collector.run().await?;
    println!(
        "Stored {} entries from {} registrations ({} rejected)",
        stats.entries, stats.registrations, stats.rejected
    );
    Ok(())
}

#[cfg(unix)]
async fn handle_signals(control: CollectorControl) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGHUP");
            wait_for_interrupt(control).await;
            return;
        }
    };

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                }
                info!("shutting down");
                control.shutdown();
                return;
            }
            _ = hangup.recv() => {
                info!("SIGHUP received, rolling log");
                if let Err(e) = control.roll().await {
                    warn!(error = %e, "roll failed");
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn handle_signals(control: CollectorControl) {
    wait_for_interrupt(control).await;
}

async fn wait_for_interrupt(control: CollectorControl) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
    }
    info!("shutting down");
    control.shutdown();
}
