//! Arena relay server entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use arena_relay::cli::RelayCli;
use arena_sync::server::{Relay, RelayServer, RelayStats};

fn log_stats(stats: &RelayStats) {
    info!(
        "{} player(s) online, {} connection(s) total, {} message(s) received ({} discarded), \
         {} frame(s) delivered, {} dropped, {} skipped",
        stats.active_participants,
        stats.total_connections,
        stats.messages_received,
        stats.messages_discarded,
        stats.broadcast.frames_delivered,
        stats.broadcast.frames_dropped,
        stats.broadcast.frames_skipped,
    );
}

async fn report_stats(relay: Arc<Relay>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        log_stats(&relay.stats().await);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = RelayCli::parse();
    arena_relay::init_logging(&cli.log_level);

    info!("Starting arena relay v{}", env!("CARGO_PKG_VERSION"));

    let server = RelayServer::new(cli.relay_config());
    let listener = TcpListener::bind(server.bind_addr()).await?;

    if cli.stats_interval > 0 {
        tokio::spawn(report_stats(
            server.relay().clone(),
            Duration::from_secs(cli.stats_interval),
        ));
    }

    server
        .serve_until(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await?;

    log_stats(&server.stats().await);
    Ok(())
}
