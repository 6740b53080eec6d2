//! Command-line configuration for the relay and bot binaries.
//!
//! Every flag can also be set through an `ARENA_*` environment variable.

use clap::Parser;

use arena_sync::client::ClientConfig;
use arena_sync::protocol::Transform;
use arena_sync::server::RelayConfig;

/// Arena relay server
#[derive(Parser, Debug)]
#[command(name = "arena-relay")]
#[command(about = "Arena presence relay: admits players and fans out their transforms")]
pub struct RelayCli {
    /// Address to bind to
    #[arg(long, env = "ARENA_BIND", default_value = "0.0.0.0:8082")]
    pub bind: String,

    /// WebSocket endpoint path
    #[arg(long, env = "ARENA_PATH", default_value = "/ws")]
    pub path: String,

    /// Frames buffered per connection before frames are dropped
    #[arg(long, env = "ARENA_OUTBOX_CAPACITY", default_value_t = 64)]
    pub outbox_capacity: usize,

    /// Spawn position for new players, as `x,y,z`
    #[arg(long, env = "ARENA_SPAWN", value_parser = parse_vec3, default_value = "0,1.6,0")]
    pub spawn: [f32; 3],

    /// Seconds between statistics log lines (0 disables)
    #[arg(long, env = "ARENA_STATS_INTERVAL", default_value_t = 30)]
    pub stats_interval: u64,

    /// Log level
    #[arg(long, env = "ARENA_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl RelayCli {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            bind_addr: self.bind.clone(),
            path: self.path.clone(),
            outbox_capacity: self.outbox_capacity,
            spawn: Transform::new(self.spawn, [0.0; 3]),
        }
    }
}

/// Headless arena client
#[derive(Parser, Debug)]
#[command(name = "arena-bot")]
#[command(about = "Headless arena client that walks in a circle and logs other players")]
pub struct BotCli {
    /// Relay endpoint
    #[arg(long, env = "ARENA_ENDPOINT", default_value = "ws://127.0.0.1:8082/ws")]
    pub endpoint: String,

    /// State reports per second
    #[arg(long, env = "ARENA_PUBLISH_RATE", default_value_t = 20.0)]
    pub publish_rate: f64,

    /// Radius of the walked circle
    #[arg(long, default_value_t = 4.0)]
    pub radius: f32,

    /// Angular speed in radians per second
    #[arg(long, default_value_t = 0.5)]
    pub speed: f32,

    /// Stop after this many seconds instead of running until Ctrl-C
    #[arg(long)]
    pub duration: Option<u64>,

    /// Log level
    #[arg(long, env = "ARENA_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl BotCli {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            publish_rate_hz: self.publish_rate,
            ..ClientConfig::default()
        }
    }
}

/// Parse `x,y,z` into a vector.
pub fn parse_vec3(raw: &str) -> Result<[f32; 3], String> {
    let parts = raw
        .split(',')
        .map(|part| part.trim().parse::<f32>().map_err(|e| format!("{part:?}: {e}")))
        .collect::<Result<Vec<f32>, String>>()?;

    <[f32; 3]>::try_from(parts.as_slice())
        .map_err(|_| format!("expected three comma-separated numbers, got {}", parts.len()))
}
