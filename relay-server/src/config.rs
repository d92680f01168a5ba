//! The configuration tree (§6) and its hot-reload, mirroring the teacher's
//! `lobby::reload_config`: read the whole file, parse it, swap it into a
//! `RwLock` under the app state. Unlike the teacher we load a structured
//! tree instead of a flat game-list, but the reload mechanics are the same.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;

/// Which code scheme a room's four/six-letter code is drawn from.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodeScheme {
    #[default]
    V1,
    V2,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub port: u16,
    #[serde(rename = "acceptUnknownGameData")]
    pub accept_unknown_game_data: bool,
    /// Reserved: accepted and round-tripped, never interpreted. See
    /// DESIGN.md's Open Questions section.
    #[serde(rename = "messageOrdering")]
    pub message_ordering: Option<serde_json::Value>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            port: 22023,
            accept_unknown_game_data: false,
            message_ordering: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    #[serde(rename = "gameCodes")]
    pub game_codes: CodeScheme,
    #[serde(rename = "chatCommands")]
    pub chat_commands: bool,
    #[serde(rename = "serverAsHost")]
    pub server_as_host: bool,
    #[serde(rename = "createTimeout")]
    pub create_timeout_secs: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        RoomsConfig {
            game_codes: CodeScheme::V1,
            chat_commands: true,
            server_as_host: false,
            create_timeout_secs: 10,
        }
    }
}

/// One entry of the server-wide mod policy table (§4.4).
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ModPolicyEntry {
    Allowed(bool),
    Detailed {
        version: Option<String>,
        #[serde(default)]
        banned: bool,
        #[serde(default)]
        optional: bool,
    },
}

impl ModPolicyEntry {
    pub fn is_banned(&self) -> bool {
        matches!(self, ModPolicyEntry::Allowed(false))
            || matches!(self, ModPolicyEntry::Detailed { banned: true, .. })
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, ModPolicyEntry::Detailed { optional: true, .. })
    }

    pub fn required_version(&self) -> Option<&str> {
        match self {
            ModPolicyEntry::Detailed { version, .. } => version.as_deref(),
            ModPolicyEntry::Allowed(_) => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct ReactorDetails {
    #[serde(rename = "allowNormalClients")]
    pub allow_normal_clients: bool,
    #[serde(rename = "requireHostMods")]
    pub require_host_mods: bool,
    #[serde(rename = "blockClientSideOnly")]
    pub block_client_side_only: bool,
    #[serde(rename = "allowExtraMods")]
    pub allow_extra_mods: bool,
    pub mods: HashMap<String, ModPolicyEntry>,
}

/// `reactor` is `false`, `true`, or a detailed policy object (§4.4).
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ReactorConfig {
    Disabled(bool),
    Detailed(ReactorDetails),
}

impl Default for ReactorConfig {
    fn default() -> Self {
        ReactorConfig::Disabled(false)
    }
}

impl ReactorConfig {
    pub fn is_enabled(&self) -> bool {
        match self {
            ReactorConfig::Disabled(enabled) => *enabled,
            ReactorConfig::Detailed(_) => true,
        }
    }

    pub fn allow_normal_clients(&self) -> bool {
        match self {
            ReactorConfig::Disabled(_) => true,
            ReactorConfig::Detailed(details) => details.allow_normal_clients,
        }
    }

    pub fn details(&self) -> Option<&ReactorDetails> {
        match self {
            ReactorConfig::Disabled(_) => None,
            ReactorConfig::Detailed(details) => Some(details),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct MovementConfig {
    #[serde(rename = "reuseBuffer")]
    pub reuse_buffer: bool,
    #[serde(rename = "updateRate")]
    pub update_rate: u32,
    #[serde(rename = "visionChecks")]
    pub vision_checks: bool,
    #[serde(rename = "deadChecks")]
    pub dead_checks: bool,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct OptimizationsConfig {
    pub movement: MovementConfig,
    #[serde(rename = "disablePerspectives")]
    pub disable_perspectives: bool,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub socket: SocketConfig,
    pub versions: Vec<String>,
    pub rooms: RoomsConfig,
    pub reactor: ReactorConfig,
    pub optimizations: OptimizationsConfig,
}

impl ServerConfig {
    pub fn is_version_allowed(&self, version: &str) -> bool {
        self.versions.is_empty() || self.versions.iter().any(|v| v == version)
    }
}

const CONFIG_PATH: &str = "ServerConfig.json";

/// Reads and parses `ServerConfig.json` from the working directory.
pub async fn load_config() -> Result<ServerConfig, String> {
    let json_content = tokio::fs::read_to_string(CONFIG_PATH)
        .await
        .map_err(|e| format!("Failed to read {CONFIG_PATH}: {e}"))?;
    serde_json::from_str(&json_content).map_err(|e| format!("Failed to parse {CONFIG_PATH}: {e}"))
}

/// Reloads the configuration in place, mirroring `lobby::reload_config`.
pub async fn reload_config(config: &Arc<RwLock<ServerConfig>>) -> Result<(), String> {
    let fresh = load_config().await?;
    let mut guard = config.write().await;
    *guard = fresh;
    Ok(())
}
