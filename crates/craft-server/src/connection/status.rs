//! Status (server list ping) phase.

use bytes::Bytes;
use craft_proto::codec::ProtoDecode;
use craft_proto::packets::{StatusPing, StatusPong, StatusRequest, StatusResponse};
use craft_proto::{GAME_VERSION, PROTOCOL_VERSION};
use serde::Serialize;

use super::{ConnError, Connection};

#[derive(Serialize)]
struct StatusJson {
    version: VersionJson,
    players: PlayersJson,
    description: DescriptionJson,
}

#[derive(Serialize)]
struct VersionJson {
    name: &'static str,
    protocol: i32,
}

#[derive(Serialize)]
struct PlayersJson {
    max: u32,
    online: usize,
}

#[derive(Serialize)]
struct DescriptionJson {
    text: String,
}

impl Connection {
    pub(crate) async fn handle_status(
        &mut self,
        packet_id: i32,
        mut data: Bytes,
    ) -> Result<(), ConnError> {
        match packet_id {
            0x00 => {
                let _ = StatusRequest::proto_decode(&mut data)?;
                let status = StatusJson {
                    version: VersionJson {
                        name: GAME_VERSION,
                        protocol: PROTOCOL_VERSION,
                    },
                    players: PlayersJson {
                        max: self.cfg.max_players,
                        online: self.players.player_count().await,
                    },
                    description: DescriptionJson {
                        text: self.cfg.motd.clone(),
                    },
                };
                let json = serde_json::to_string(&status)
                    .map_err(|e| ConnError::InvalidData(e.to_string()))?;
                self.sink.send(&StatusResponse { json }).await?;
                Ok(())
            }

            0x01 => {
                let ping = StatusPing::proto_decode(&mut data)?;
                self.sink
                    .send(&StatusPong {
                        payload: ping.payload,
                    })
                    .await?;
                Ok(())
            }

            other => Err(ConnError::UnexpectedPacket {
                phase: self.phase,
                id: other,
            }),
        }
    }
}
