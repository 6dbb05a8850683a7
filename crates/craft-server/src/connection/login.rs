//! Login phase: offline and Mojang-authenticated flows.

use std::time::Duration;

use bytes::Bytes;
use craft_crypto::{offline_uuid, server_hash};
use craft_proto::codec::{ByteArray, ProtoDecode};
use craft_proto::packets::{
    EncryptionRequest, EncryptionResponse, LoginDisconnect, LoginStart, LoginSuccess, Phase,
};
use craft_proto::types::{hyphenate_uuid, Uuid};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{ConnError, Connection};
use crate::player::SkinProperty;

const SESSION_SERVER: &str = "https://sessionserver.mojang.com";
const API_SERVER: &str = "https://api.mojang.com";

#[derive(Debug, Deserialize)]
pub(crate) struct MojangProfile {
    id: String,
    name: String,
    #[serde(default)]
    properties: Vec<MojangProperty>,
}

#[derive(Debug, Deserialize)]
struct MojangProperty {
    name: String,
    value: String,
    #[serde(default)]
    signature: String,
}

impl MojangProperty {
    fn into_skin_property(self) -> SkinProperty {
        SkinProperty {
            name: self.name,
            value: self.value,
            signature: self.signature,
        }
    }
}

/// Client for the Mojang web endpoints. The base URLs are injectable so the
/// suite can point it at a local stand-in server.
pub(crate) struct SessionClient {
    http: reqwest::Client,
    session_server: String,
    api_server: String,
}

impl Default for SessionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionClient {
    pub(crate) fn new() -> Self {
        Self::with_base_urls(SESSION_SERVER, API_SERVER)
    }

    pub(crate) fn with_base_urls(
        session_server: impl Into<String>,
        api_server: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            session_server: session_server.into(),
            api_server: api_server.into(),
        }
    }

    /// Check a joining player against the session server.
    pub(crate) async fn has_joined(
        &self,
        username: &str,
        hash: &str,
    ) -> Result<MojangProfile, ConnError> {
        let url = format!(
            "{}/session/minecraft/hasJoined?username={username}&serverId={hash}",
            self.session_server
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ConnError::Auth(format!("mojang request: {e}")))?;

        match response.status().as_u16() {
            200 => response
                .json::<MojangProfile>()
                .await
                .map_err(|e| ConnError::Auth(format!("decode mojang response: {e}"))),
            // 204 means the client never called joinServer; 403 is a
            // rejection.
            status @ (204 | 403) => Err(ConnError::Auth(format!("mojang auth failed ({status})"))),
            status => Err(ConnError::Auth(format!("mojang unexpected status {status}"))),
        }
    }

    /// Look up a username's signed skin properties, for offline-mode
    /// logins. Returns None when the name has no account or on any error.
    pub(crate) async fn fetch_skin_by_username(&self, username: &str) -> Option<Vec<SkinProperty>> {
        let profile_url = format!("{}/users/profiles/minecraft/{username}", self.api_server);
        let response = match self.http.get(&profile_url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(username, status = %r.status(), "no mojang profile");
                return None;
            }
            Err(e) => {
                warn!(username, error = %e, "mojang profile lookup failed");
                return None;
            }
        };
        let profile: MojangProfile = response.json().await.ok()?;

        let skin_url = format!(
            "{}/session/minecraft/profile/{}?unsigned=false",
            self.session_server, profile.id
        );
        let response = self.http.get(&skin_url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let skin_profile: MojangProfile = response.json().await.ok()?;

        Some(
            skin_profile
                .properties
                .into_iter()
                .map(MojangProperty::into_skin_property)
                .collect(),
        )
    }
}

impl Connection {
    pub(crate) async fn handle_login(
        &mut self,
        packet_id: i32,
        mut data: Bytes,
    ) -> Result<(), ConnError> {
        match packet_id {
            0x00 => {
                let login = LoginStart::proto_decode(&mut data)?;
                info!(addr = %self.peer, username = %login.name, "login start");
                if self.cfg.online_mode {
                    self.start_online_login(login.name).await
                } else {
                    self.finish_offline_login(login.name).await
                }
            }
            0x01 => self.handle_encryption_response(data).await,
            other => Err(ConnError::UnexpectedPacket {
                phase: self.phase,
                id: other,
            }),
        }
    }

    async fn finish_offline_login(&mut self, username: String) -> Result<(), ConnError> {
        let uuid_bytes = Uuid(offline_uuid(&username));
        let uuid = uuid_bytes.hyphenated();
        info!(addr = %self.peer, username = %username, %uuid, "offline login success");

        self.sink
            .send(&LoginSuccess {
                uuid: uuid.clone(),
                username: username.clone(),
            })
            .await?;

        // Best-effort skin lookup so offline players still render.
        let properties = self
            .session
            .fetch_skin_by_username(&username)
            .await
            .unwrap_or_default();

        self.phase = Phase::Play;
        self.start_play(username, uuid, uuid_bytes, properties).await
    }

    async fn start_online_login(&mut self, username: String) -> Result<(), ConnError> {
        let keys = self
            .keys
            .clone()
            .ok_or_else(|| ConnError::Auth("online mode without a server keypair".into()))?;

        let verify_token: [u8; 4] = rand::random();
        self.login_username = username;
        self.verify_token = verify_token.to_vec();

        // Server id is the empty string on 1.8.
        self.sink
            .send(&EncryptionRequest {
                server_id: String::new(),
                public_key: ByteArray::new(keys.public_key_der().to_vec()),
                verify_token: ByteArray::new(verify_token.to_vec()),
            })
            .await?;
        Ok(())
    }

    async fn handle_encryption_response(&mut self, mut data: Bytes) -> Result<(), ConnError> {
        let response = EncryptionResponse::proto_decode(&mut data)?;
        let keys = self
            .keys
            .clone()
            .ok_or_else(|| ConnError::Auth("encryption response without keypair".into()))?;

        let disconnect_auth = |reason: &str| LoginDisconnect {
            reason: format!(r#"{{"text":"{reason}"}}"#),
        };

        let shared_secret = match keys.decrypt(&response.shared_secret.0) {
            Ok(secret) => secret,
            Err(_) => {
                let _ = self.sink.send(&disconnect_auth("Bad encryption response.")).await;
                self.disconnect("rsa decrypt failed");
                return Err(ConnError::Auth("shared secret decrypt failed".into()));
            }
        };
        let token = match keys.decrypt(&response.verify_token.0) {
            Ok(token) => token,
            Err(_) => {
                let _ = self.sink.send(&disconnect_auth("Bad encryption response.")).await;
                self.disconnect("rsa decrypt failed");
                return Err(ConnError::Auth("verify token decrypt failed".into()));
            }
        };

        if token != self.verify_token {
            let _ = self.sink.send(&disconnect_auth("Bad encryption response.")).await;
            self.disconnect("verify token mismatch");
            return Err(ConnError::Auth("verify token mismatch".into()));
        }

        // The response itself arrived unencrypted; everything from here on,
        // LoginSuccess included, is encrypted.
        self.enable_encryption(&shared_secret).await?;

        let hash = server_hash("", &shared_secret, keys.public_key_der());
        let username = std::mem::take(&mut self.login_username);
        let profile = match self.session.has_joined(&username, &hash).await {
            Ok(profile) => profile,
            Err(e) => {
                let _ = self
                    .sink
                    .send(&disconnect_auth("Failed to verify with Mojang."))
                    .await;
                self.disconnect("mojang auth failed");
                return Err(e);
            }
        };

        let uuid = hyphenate_uuid(&profile.id);
        let uuid_bytes = Uuid::parse(&uuid)
            .ok_or_else(|| ConnError::Auth(format!("bad profile id {:?}", profile.id)))?;
        info!(addr = %self.peer, username = %profile.name, %uuid, "online login success");

        self.sink
            .send(&LoginSuccess {
                uuid: uuid.clone(),
                username: profile.name.clone(),
            })
            .await?;

        let properties = profile
            .properties
            .into_iter()
            .map(MojangProperty::into_skin_property)
            .collect();

        self.phase = Phase::Play;
        self.start_play(profile.name, uuid, uuid_bytes, properties)
            .await
    }
}
