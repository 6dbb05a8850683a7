//! Server configuration: defaults, config.json overlay, CLI overrides.

use serde::{Deserialize, Serialize};

/// Effective configuration. Built from defaults, then config.json, then any
/// explicitly passed CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub online_mode: bool,
    pub motd: String,
    pub max_players: u32,
    /// Chunk radius for chunk streaming and entity visibility.
    pub view_distance: i32,
    pub seed: i64,
    /// "default" or "flat".
    pub generator: String,
    /// World radius in chunks; 0 means unbounded.
    pub world_radius: i32,
    /// Auto-save interval in minutes; 0 disables.
    pub auto_save_minutes: u32,
    pub max_build_height: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 25565,
            online_mode: false,
            motd: "A Minecraft Server".into(),
            max_players: 20,
            view_distance: 8,
            seed: 0,
            generator: "default".into(),
            world_radius: 0,
            auto_save_minutes: 5,
            max_build_height: 256,
        }
    }
}

/// config.json contents: every field optional, unknown fields ignored.
#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    pub port: Option<u16>,
    pub online_mode: Option<bool>,
    pub motd: Option<String>,
    pub max_players: Option<u32>,
    pub view_distance: Option<i32>,
    pub seed: Option<i64>,
    pub generator: Option<String>,
    pub world_radius: Option<i32>,
    pub auto_save_minutes: Option<u32>,
    pub max_build_height: Option<i32>,
}

impl Config {
    /// Overlay values present in config.json.
    pub fn apply_file(&mut self, partial: &PartialConfig) {
        if let Some(port) = partial.port {
            self.port = port;
        }
        if let Some(online_mode) = partial.online_mode {
            self.online_mode = online_mode;
        }
        if let Some(motd) = &partial.motd {
            self.motd = motd.clone();
        }
        if let Some(max_players) = partial.max_players {
            self.max_players = max_players;
        }
        if let Some(view_distance) = partial.view_distance {
            self.view_distance = view_distance;
        }
        if let Some(seed) = partial.seed {
            self.seed = seed;
        }
        if let Some(generator) = &partial.generator {
            self.generator = generator.clone();
        }
        if let Some(world_radius) = partial.world_radius {
            self.world_radius = world_radius;
        }
        if let Some(auto_save_minutes) = partial.auto_save_minutes {
            self.auto_save_minutes = auto_save_minutes;
        }
        if let Some(max_build_height) = partial.max_build_height {
            self.max_build_height = max_build_height;
        }
    }
}
