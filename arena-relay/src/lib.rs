//! Shared pieces of the `arena-relay` and `arena-bot` binaries.

pub mod bot;
pub mod cli;

/// Initialize `env_logger` with `level` as the default filter.
///
/// `RUST_LOG`, when set, takes precedence.
pub fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}
