//! Headless arena client: joins a relay, walks in a circle and logs who else
//! is around.

use std::time::{Duration, Instant};

use clap::Parser;
use log::info;

use arena_relay::bot::{run_until, CirclingPlayer, LoggingScene};
use arena_relay::cli::BotCli;
use arena_sync::presence::PresenceSync;
use arena_sync::protocol::Transform;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = BotCli::parse();
    arena_relay::init_logging(&cli.log_level);

    let mut scene = LoggingScene::default();
    let mut player = CirclingPlayer::new(Transform::SPAWN.position, cli.radius, cli.speed);
    let mut sync: PresenceSync<LoggingScene> = PresenceSync::new(cli.client_config());

    sync.connect(&cli.endpoint, &mut scene).await?;

    let deadline = cli.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let stop = run_until(&mut sync, &mut scene, &mut player, deadline, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    })
    .await;
    info!("Bot stopping: {stop:?}");

    sync.disconnect(&mut scene);
    info!("Bot stopped, {} avatar(s) left in scene", scene.live());
    Ok(())
}
