//! Chat command dispatch.

use craft_proto::packets::{
    game_mode, ChatMessage, EntityStatus, EntityTeleport, GameStateChange, PlayerAbilities,
    PlayerPositionAndLook, UpdateHealth, UpdateTime,
};
use craft_proto::types::{degrees_to_angle, fixed_point, VarInt};
use tracing::warn;

use super::play::{abilities_for_game_mode, escape_json};
use super::{ConnError, Connection};

struct Command {
    name: &'static str,
    usage: &'static str,
    desc: &'static str,
}

const COMMANDS: &[Command] = &[
    Command {
        name: "help",
        usage: "/help",
        desc: "Show available commands",
    },
    Command {
        name: "list",
        usage: "/list",
        desc: "Show online players",
    },
    Command {
        name: "tp",
        usage: "/tp <player> | /tp <x> <y> <z>",
        desc: "Teleport to a player or coordinates",
    },
    Command {
        name: "gamemode",
        usage: "/gamemode <survival|creative|adventure|spectator>",
        desc: "Change game mode",
    },
    Command {
        name: "time",
        usage: "/time set <day|night|noon|midnight|number>",
        desc: "Set world time",
    },
    Command {
        name: "say",
        usage: "/say <message>",
        desc: "Broadcast an announcement",
    },
    Command {
        name: "me",
        usage: "/me <action>",
        desc: "Send an action message",
    },
    Command {
        name: "kill",
        usage: "/kill",
        desc: "Kill yourself",
    },
    Command {
        name: "seed",
        usage: "/seed",
        desc: "Show world seed",
    },
    Command {
        name: "save",
        usage: "/save",
        desc: "Save world and player data",
    },
];

impl Connection {
    /// Intercept /-prefixed chat. Returns true when the message was a
    /// command, known or not.
    pub(crate) async fn handle_command(&mut self, message: &str) -> bool {
        if !message.starts_with('/') {
            return false;
        }
        let parts: Vec<&str> = message.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return true;
        };
        let name = first.trim_start_matches('/').to_ascii_lowercase();
        let args = &parts[1..];

        let result = match name.as_str() {
            "help" => self.cmd_help().await,
            "list" => self.cmd_list().await,
            "tp" => self.cmd_tp(args).await,
            "gamemode" => self.cmd_gamemode(args).await,
            "time" => self.cmd_time(args).await,
            "say" => self.cmd_say(args).await,
            "me" => self.cmd_me(args).await,
            "kill" => self.cmd_kill().await,
            "seed" => self.cmd_seed().await,
            "save" => self.cmd_save().await,
            _ => {
                self.send_error_msg(&format!(
                    "Unknown command: /{name}. Type /help for a list of commands."
                ))
                .await
            }
        };
        if let Err(e) = result {
            warn!(command = %name, error = %e, "command failed");
        }
        true
    }

    /// Command names matching a tab-completion request.
    pub(crate) fn complete_command(&self, text: &str) -> Vec<String> {
        let Some(partial) = text.strip_prefix('/') else {
            return Vec::new();
        };
        // Only complete the command word itself.
        if partial.contains(' ') {
            return Vec::new();
        }
        COMMANDS
            .iter()
            .filter(|cmd| cmd.name.starts_with(&partial.to_ascii_lowercase()))
            .map(|cmd| format!("/{}", cmd.name))
            .collect()
    }

    async fn send_system_msg(&mut self, text: &str, color: &str) -> Result<(), ConnError> {
        self.sink
            .send(&ChatMessage {
                json: format!(
                    r#"{{"text":{},"color":{}}}"#,
                    escape_json(text),
                    escape_json(color)
                ),
                position: 1,
            })
            .await?;
        Ok(())
    }

    async fn send_error_msg(&mut self, text: &str) -> Result<(), ConnError> {
        self.send_system_msg(text, "red").await
    }

    async fn send_success_msg(&mut self, text: &str) -> Result<(), ConnError> {
        self.send_system_msg(text, "gold").await
    }

    /// Move this connection's player, with tracker broadcast and chunk and
    /// tracking updates.
    pub(crate) async fn teleport_self(&mut self, x: f64, y: f64, z: f64) -> Result<(), ConnError> {
        let player = self.require_player()?;
        let pos = player.position();
        self.set_position_and_update_chunks(&player, x, y, z, pos.yaw, pos.pitch, false)
            .await;

        self.sink
            .send(&PlayerPositionAndLook {
                x,
                y,
                z,
                yaw: pos.yaw,
                pitch: pos.pitch,
                flags: 0x00,
            })
            .await?;

        self.players
            .broadcast_to_trackers(
                &EntityTeleport {
                    entity_id: VarInt(player.entity_id),
                    x: fixed_point(x),
                    y: fixed_point(y),
                    z: fixed_point(z),
                    yaw: degrees_to_angle(pos.yaw),
                    pitch: degrees_to_angle(pos.pitch),
                    on_ground: false,
                },
                player.entity_id,
            )
            .await;

        self.players.update_tracking(&player).await;
        Ok(())
    }

    async fn cmd_help(&mut self) -> Result<(), ConnError> {
        self.send_system_msg("--- Available Commands ---", "yellow")
            .await?;
        for cmd in COMMANDS {
            self.send_system_msg(&format!("{} - {}", cmd.usage, cmd.desc), "yellow")
                .await?;
        }
        Ok(())
    }

    async fn cmd_list(&mut self) -> Result<(), ConnError> {
        let names: Vec<String> = self
            .players
            .players()
            .await
            .iter()
            .map(|p| p.username.clone())
            .collect();
        self.send_success_msg(&format!(
            "Online players ({}): {}",
            names.len(),
            names.join(", ")
        ))
        .await
    }

    async fn cmd_tp(&mut self, args: &[&str]) -> Result<(), ConnError> {
        match args {
            [name] => {
                let Some(target) = self.players.get_by_name(name).await else {
                    return self
                        .send_error_msg(&format!("Player {name:?} not found."))
                        .await;
                };
                let pos = target.position();
                let username = target.username.clone();
                self.teleport_self(pos.x, pos.y, pos.z).await?;
                self.send_success_msg(&format!("Teleported to {username}."))
                    .await
            }
            [x, y, z] => {
                let (Ok(x), Ok(y), Ok(z)) =
                    (x.parse::<f64>(), y.parse::<f64>(), z.parse::<f64>())
                else {
                    return self.send_error_msg("Usage: /tp <x> <y> <z> (numbers)").await;
                };
                self.teleport_self(x, y, z).await?;
                self.send_success_msg(&format!("Teleported to {x:.1}, {y:.1}, {z:.1}."))
                    .await
            }
            _ => {
                self.send_error_msg("Usage: /tp <player> or /tp <x> <y> <z>")
                    .await
            }
        }
    }

    async fn cmd_gamemode(&mut self, args: &[&str]) -> Result<(), ConnError> {
        let [mode_arg] = args else {
            return self
                .send_error_msg("Usage: /gamemode <survival|creative|adventure|spectator>")
                .await;
        };

        let (mode, mode_name) = match mode_arg.to_ascii_lowercase().as_str() {
            "survival" | "s" | "0" => (game_mode::SURVIVAL, "survival"),
            "creative" | "c" | "1" => (game_mode::CREATIVE, "creative"),
            "adventure" | "a" | "2" => (game_mode::ADVENTURE, "adventure"),
            "spectator" | "sp" | "3" => (game_mode::SPECTATOR, "spectator"),
            _ => {
                return self
                    .send_error_msg("Unknown game mode. Use: survival, creative, adventure, spectator")
                    .await;
            }
        };

        let player = self.require_player()?;
        self.sink
            .send(&GameStateChange {
                reason: 3, // change game mode
                value: mode as f32,
            })
            .await?;
        player.set_game_mode(mode);
        self.players.broadcast_game_mode(&player).await;

        self.sink
            .send(&PlayerAbilities {
                flags: abilities_for_game_mode(mode),
                flying_speed: 0.05,
                walking_speed: 0.1,
            })
            .await?;

        self.send_success_msg(&format!("Game mode set to {mode_name}."))
            .await
    }

    async fn cmd_time(&mut self, args: &[&str]) -> Result<(), ConnError> {
        let usage = "Usage: /time set <day|night|noon|midnight|number>";
        let [set, value] = args else {
            return self.send_error_msg(usage).await;
        };
        if !set.eq_ignore_ascii_case("set") {
            return self.send_error_msg(usage).await;
        }

        let ticks = match value.to_ascii_lowercase().as_str() {
            "day" => 1000,
            "noon" => 6000,
            "night" => 13000,
            "midnight" => 18000,
            other => match other.parse::<i64>() {
                Ok(v) => v,
                Err(_) => return self.send_error_msg(usage).await,
            },
        };

        self.world.set_time_of_day(ticks);
        let (age, _) = self.world.get_time();
        self.players
            .broadcast(&UpdateTime {
                world_age: age,
                time_of_day: ticks,
            })
            .await;
        self.send_success_msg(&format!("Time set to {ticks}.")).await
    }

    async fn cmd_say(&mut self, args: &[&str]) -> Result<(), ConnError> {
        if args.is_empty() {
            return self.send_error_msg("Usage: /say <message>").await;
        }
        let message = args.join(" ");
        self.players
            .broadcast(&ChatMessage {
                json: format!(
                    r#"{{"text":{},"color":"light_purple"}}"#,
                    escape_json(&format!("[Server] {message}"))
                ),
                position: 0,
            })
            .await;
        Ok(())
    }

    async fn cmd_me(&mut self, args: &[&str]) -> Result<(), ConnError> {
        if args.is_empty() {
            return self.send_error_msg("Usage: /me <action>").await;
        }
        let action = args.join(" ");
        let chat = format!(
            r#"{{"translate":"chat.type.emote","with":[{},{}]}}"#,
            escape_json(&self.username()),
            escape_json(&action),
        );
        self.players
            .broadcast(&ChatMessage {
                json: chat,
                position: 0,
            })
            .await;
        Ok(())
    }

    async fn cmd_kill(&mut self) -> Result<(), ConnError> {
        let player = self.require_player()?;
        self.dead = true;
        self.sink
            .send(&UpdateHealth {
                health: 0.0,
                food: VarInt(0),
                saturation: 0.0,
            })
            .await?;
        self.players
            .broadcast_to_trackers(
                &EntityStatus {
                    entity_id: player.entity_id,
                    status: 3, // death animation
                },
                player.entity_id,
            )
            .await;
        self.send_success_msg("You killed yourself.").await
    }

    async fn cmd_seed(&mut self) -> Result<(), ConnError> {
        let seed = self.cfg.seed;
        self.send_success_msg(&format!("Seed: [{seed}]")).await
    }

    async fn cmd_save(&mut self) -> Result<(), ConnError> {
        self.send_success_msg("Saving world and player data...")
            .await?;
        self.storage.save_all(&self.world, &self.players).await;
        self.send_success_msg("Save complete.").await
    }
}
