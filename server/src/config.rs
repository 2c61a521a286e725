//! Server tunables. Defaults match the game's original timings.

use shared::{DEFAULT_PORT, MAX_FRAME_BYTES, TAG_DISTANCE};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Players closer than this (inclusive) pass It along.
    pub tag_distance: f32,
    /// Delay before the very first proximity scan.
    pub first_scan_delay: Duration,
    /// Delay between proximity scans that found no tag.
    pub scan_interval: Duration,
    /// Quiet period after a tag before anyone can be tagged again.
    pub tag_cooldown: Duration,
    /// How often the failsafe checks that somebody is It.
    pub failsafe_interval: Duration,
    pub max_frame_bytes: usize,
    /// Check the moving player against It on every position update, in
    /// addition to the periodic scan.
    pub event_driven_tagging: bool,
    /// Fixed seed for failsafe selection; entropy when `None`.
    pub rng_seed: Option<u64>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            tag_distance: TAG_DISTANCE,
            first_scan_delay: Duration::from_millis(20),
            scan_interval: Duration::from_millis(100),
            tag_cooldown: Duration::from_millis(3000),
            failsafe_interval: Duration::from_secs(15),
            max_frame_bytes: MAX_FRAME_BYTES,
            event_driven_tagging: true,
            rng_seed: None,
        }
    }
}
