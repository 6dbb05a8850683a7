//! Listener, tick loop, and auto-save orchestration.

use std::sync::Arc;
use std::time::Duration;

use craft_crypto::ServerKeyPair;
use craft_world::{FlatGenerator, Generator, OverworldGenerator, World};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;
use crate::connection::{Connection, SessionClient};
use crate::persistence::Storage;
use crate::player::manager::Manager;

pub struct Server {
    cfg: Arc<Config>,
    keys: Option<Arc<ServerKeyPair>>,
    world: Arc<World>,
    players: Arc<Manager>,
    storage: Arc<Storage>,
    session: Arc<SessionClient>,
}

impl Server {
    pub fn new(cfg: Arc<Config>, keys: Option<Arc<ServerKeyPair>>, storage: Arc<Storage>) -> Self {
        Self::with_session(cfg, keys, storage, Arc::new(SessionClient::new()))
    }

    /// Construct with a specific Mojang endpoint client (the suite points
    /// this at a local stand-in).
    pub(crate) fn with_session(
        cfg: Arc<Config>,
        keys: Option<Arc<ServerKeyPair>>,
        storage: Arc<Storage>,
        session: Arc<SessionClient>,
    ) -> Self {
        let generator: Box<dyn Generator> = match cfg.generator.as_str() {
            "flat" => Box::new(FlatGenerator::new(cfg.seed)),
            _ => Box::new(OverworldGenerator::new(cfg.seed)),
        };
        Self {
            world: Arc::new(World::new(generator)),
            players: Arc::new(Manager::new(cfg.view_distance)),
            keys,
            storage,
            session,
            cfg,
        }
    }

    /// Bind the listening socket and run until the shutdown signal fires.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.cfg.port)).await?;
        self.run_on(listener, shutdown).await
    }

    /// Accept connections on an already-bound listener until the shutdown
    /// signal fires, then save everything.
    pub async fn run_on(
        &self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        if let Err(e) = self.storage.load_world(&self.world) {
            error!(error = %e, "failed to load world data");
        }

        if self.cfg.world_radius > 0 {
            let total = (2 * self.cfg.world_radius + 1).pow(2);
            info!(radius = self.cfg.world_radius, chunks = total, "pre-generating world");
            self.world.pre_generate_radius(self.cfg.world_radius);
            info!("world pre-generation complete");
        }

        info!(
            port = self.cfg.port,
            online_mode = self.cfg.online_mode,
            motd = %self.cfg.motd,
            generator = %self.cfg.generator,
            seed = self.cfg.seed,
            "server started"
        );

        self.spawn_tick_loop(shutdown.clone());
        if self.cfg.auto_save_minutes > 0 {
            self.spawn_auto_save(shutdown.clone());
        }

        let mut shutdown_accept = shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown_accept.changed() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let connection = Connection::new(
                        stream,
                        peer,
                        Arc::clone(&self.cfg),
                        self.keys.clone(),
                        Arc::clone(&self.world),
                        Arc::clone(&self.players),
                        Arc::clone(&self.storage),
                        Arc::clone(&self.session),
                        shutdown.clone(),
                    );
                    tokio::spawn(connection.handle());
                }
            }
        }

        info!("server shutting down");
        self.storage.save_all(&self.world, &self.players).await;
        Ok(())
    }

    /// 20 Hz world and manager tick.
    fn spawn_tick_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let world = Arc::clone(&self.world);
        let players = Arc::clone(&self.players);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(50));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = interval.tick() => {
                        world.tick();
                        players.tick().await;
                    }
                }
            }
        });
    }

    fn spawn_auto_save(&self, mut shutdown: watch::Receiver<bool>) {
        let world = Arc::clone(&self.world);
        let players = Arc::clone(&self.players);
        let storage = Arc::clone(&self.storage);
        let minutes = self.cfg.auto_save_minutes;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(minutes as u64 * 60));
            // Skip the immediate first tick.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = interval.tick() => {
                        info!("auto-saving");
                        storage.save_all(&world, &players).await;
                    }
                }
            }
        });
    }
}
