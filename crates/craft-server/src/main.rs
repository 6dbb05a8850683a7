mod config;
mod connection;
mod persistence;
mod player;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use craft_crypto::ServerKeyPair;
use tokio::sync::watch;
use tracing::{error, info};

use config::Config;
use persistence::Storage;
use server::Server;

/// Minecraft Java Edition 1.8.9 server.
#[derive(Debug, Parser)]
#[command(name = "craft-server", version)]
struct Cli {
    /// Directory for persistent data.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Server port.
    #[arg(long)]
    port: Option<u16>,

    /// Enable Mojang authentication.
    #[arg(long)]
    online_mode: Option<bool>,

    /// Server description.
    #[arg(long)]
    motd: Option<String>,

    /// Maximum players shown in the server list.
    #[arg(long)]
    max_players: Option<u32>,

    /// Chunk and entity view distance in chunks.
    #[arg(long)]
    view_distance: Option<i32>,

    /// World generation seed.
    #[arg(long)]
    seed: Option<i64>,

    /// World generator type (default, flat).
    #[arg(long)]
    generator: Option<String>,

    /// World radius in chunks (0 = infinite).
    #[arg(long)]
    world_radius: Option<i32>,

    /// Auto-save interval in minutes (0 = disabled).
    #[arg(long = "auto-save")]
    auto_save: Option<u32>,

    /// Maximum build height.
    #[arg(long)]
    max_build_height: Option<i32>,
}

impl Cli {
    fn apply(&self, cfg: &mut Config) {
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(online_mode) = self.online_mode {
            cfg.online_mode = online_mode;
        }
        if let Some(motd) = &self.motd {
            cfg.motd = motd.clone();
        }
        if let Some(max_players) = self.max_players {
            cfg.max_players = max_players;
        }
        if let Some(view_distance) = self.view_distance {
            cfg.view_distance = view_distance;
        }
        if let Some(seed) = self.seed {
            cfg.seed = seed;
        }
        if let Some(generator) = &self.generator {
            cfg.generator = generator.clone();
        }
        if let Some(world_radius) = self.world_radius {
            cfg.world_radius = world_radius;
        }
        if let Some(auto_save) = self.auto_save {
            cfg.auto_save_minutes = auto_save;
        }
        if let Some(max_build_height) = self.max_build_height {
            cfg.max_build_height = max_build_height;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let storage = match Storage::new(&cli.data_dir) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            error!(error = %e, "create storage");
            std::process::exit(1);
        }
    };

    // Defaults, then config.json, then explicitly passed flags.
    let mut cfg = Config::default();
    match storage.load_config() {
        Ok(Some(partial)) => cfg.apply_file(&partial),
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "load config");
            std::process::exit(1);
        }
    }
    cli.apply(&mut cfg);

    if let Err(e) = storage.save_config(&cfg) {
        error!(error = %e, "save config");
    }

    let keys = if cfg.online_mode {
        match ServerKeyPair::generate() {
            Ok(keys) => {
                info!("online mode enabled, RSA keypair generated");
                Some(Arc::new(keys))
            }
            Err(e) => {
                error!(error = %e, "generate RSA key");
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let server = Server::new(Arc::new(cfg), keys, storage);
    if let Err(e) = server.run(shutdown_rx).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
    info!("server shut down");
}
