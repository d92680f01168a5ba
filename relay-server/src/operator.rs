//! The operator console (§6): a line-oriented stdin reader on the same
//! event loop, generalized from the teacher's `enlist_handler`/
//! `reload_handler` HTTP routes - here there is no separate listener,
//! consistent with §5's single-loop concurrency model.

use std::collections::HashMap;

use crate::commands::tokenize;

/// A plugin accepted by `load`, tracked only so the operator surface has
/// something real to report (§1 Non-goals: no on-disk plugin host is
/// re-implemented; §AMBIENT ADDITIONS item 4).
#[derive(Clone, Debug)]
pub struct PluginRecord {
    pub id: String,
    pub path: String,
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, PluginRecord>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    pub fn load(&mut self, path: String) -> String {
        let id = std::path::Path::new(&path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        self.plugins.insert(id.clone(), PluginRecord { id: id.clone(), path });
        id
    }

    pub fn unload(&mut self, plugin_id: &str) -> bool {
        self.plugins.remove(plugin_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginRecord> {
        self.plugins.values()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DisconnectFilter {
    pub client_id: Option<u16>,
    pub username: Option<String>,
    pub address: Option<String>,
    pub room: Option<i32>,
    pub reason: Option<String>,
    pub ban_duration_secs: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OperatorCommand {
    Disconnect(DisconnectFilter),
    Destroy { code: i32, reason: Option<String> },
    Load { path: String },
    Unload { plugin_id: String },
    ListClients,
    ListRooms,
    ListPlugins,
    ListMods { plugin_id: String },
    ListPlayers { code: i32 },
    ListPov { code: i32 },
    Broadcast { text: String, room: Option<i32> },
    Mem,
}

fn parse_flag_value(tokens: &[String], flag: &str) -> Option<String> {
    tokens
        .iter()
        .position(|t| t == flag)
        .and_then(|i| tokens.get(i + 1))
        .cloned()
}

/// Parses one operator console line (§6 "Operator surface").
pub fn parse_operator_line(line: &str) -> Result<OperatorCommand, String> {
    let tokens = tokenize(line);
    let Some(verb) = tokens.first() else {
        return Err("empty command".into());
    };

    match verb.as_str() {
        "dc" => Ok(OperatorCommand::Disconnect(DisconnectFilter {
            client_id: parse_flag_value(&tokens, "--client").and_then(|v| v.parse().ok()),
            username: parse_flag_value(&tokens, "--username"),
            address: parse_flag_value(&tokens, "--address"),
            room: parse_flag_value(&tokens, "--room").and_then(|v| v.parse().ok()),
            reason: parse_flag_value(&tokens, "--reason"),
            ban_duration_secs: parse_flag_value(&tokens, "--ban").and_then(|v| v.parse().ok()),
        })),
        "destroy" => {
            let code = tokens
                .get(1)
                .ok_or("usage: destroy <code> [--reason text]")?
                .parse()
                .map_err(|_| "room code must be an integer".to_string())?;
            Ok(OperatorCommand::Destroy {
                code,
                reason: parse_flag_value(&tokens, "--reason"),
            })
        }
        "load" => Ok(OperatorCommand::Load {
            path: tokens.get(1).ok_or("usage: load <path>")?.clone(),
        }),
        "unload" => Ok(OperatorCommand::Unload {
            plugin_id: tokens.get(1).ok_or("usage: unload <plugin-id>")?.clone(),
        }),
        "list" => match tokens.get(1).map(|s| s.as_str()) {
            Some("clients") => Ok(OperatorCommand::ListClients),
            Some("rooms") => Ok(OperatorCommand::ListRooms),
            Some("plugins") => Ok(OperatorCommand::ListPlugins),
            Some("mods") => Ok(OperatorCommand::ListMods {
                plugin_id: tokens.get(2).ok_or("usage: list mods <id>")?.clone(),
            }),
            Some("players") => Ok(OperatorCommand::ListPlayers {
                code: tokens
                    .get(2)
                    .ok_or("usage: list players <code>")?
                    .parse()
                    .map_err(|_| "room code must be an integer".to_string())?,
            }),
            Some("pov") => Ok(OperatorCommand::ListPov {
                code: tokens
                    .get(2)
                    .ok_or("usage: list pov <code>")?
                    .parse()
                    .map_err(|_| "room code must be an integer".to_string())?,
            }),
            _ => Err("usage: list clients|rooms|plugins|mods <id>|players <code>|pov <code>".into()),
        },
        "broadcast" => {
            let room = parse_flag_value(&tokens, "--room").and_then(|v| v.parse().ok());
            let text_tokens: Vec<&str> = tokens[1..]
                .iter()
                .take_while(|t| t.as_str() != "--room")
                .map(|s| s.as_str())
                .collect();
            if text_tokens.is_empty() {
                return Err("usage: broadcast <text> [--room <code>]".into());
            }
            Ok(OperatorCommand::Broadcast {
                text: text_tokens.join(" "),
                room,
            })
        }
        "mem" => Ok(OperatorCommand::Mem),
        other => Err(format!("unknown operator command: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_registry_load_derives_id_from_path_stem() {
        let mut registry = PluginRegistry::new();
        let id = registry.load("/plugins/anti_cheat.so".into());
        assert_eq!(id, "anti_cheat");
        assert_eq!(registry.iter().count(), 1);
        assert!(registry.unload("anti_cheat"));
        assert_eq!(registry.iter().count(), 0);
    }

    #[test]
    fn parses_destroy_with_reason_flag() {
        let command = parse_operator_line("destroy 12345 --reason maintenance").unwrap();
        assert_eq!(
            command,
            OperatorCommand::Destroy {
                code: 12345,
                reason: Some("maintenance".into()),
            }
        );
    }

    #[test]
    fn parses_list_players_for_code() {
        let command = parse_operator_line("list players 500").unwrap();
        assert_eq!(command, OperatorCommand::ListPlayers { code: 500 });
    }

    #[test]
    fn parses_broadcast_with_quoted_text_and_room_flag() {
        let command = parse_operator_line("broadcast 'server restarting soon' --room 7").unwrap();
        assert_eq!(
            command,
            OperatorCommand::Broadcast {
                text: "server restarting soon".into(),
                room: Some(7),
            }
        );
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(parse_operator_line("frobnicate").is_err());
    }
}
