//! The mod-handshake state machine (§4.4): `New -> HelloReceived ->
//! (ModsAwaited | Ready) -> Ready`. Modeled as small, pure functions
//! returning an explicit action for the caller to perform - the "narrow
//! interface per operation" pattern from §9's design notes, standing in for
//! the original's evented veto hooks.

use semver::{Version, VersionReq};

use protocol::{DisconnectReason, ModSide, PluginModEntry};

use crate::config::{ReactorConfig, ServerConfig};
use crate::connection::{Connection, ModDeclaration};

pub const HANDSHAKE_ACK_CHUNK_SIZE: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    New,
    HelloReceived,
    ModsAwaited,
    Ready,
}

/// What the caller must do in response to a handshake event.
pub enum HandshakeAction {
    /// Nothing further required (e.g. a non-hello packet while `New`).
    Ignore,
    /// Disconnect with this reason; the connection is not usable further.
    Disconnect(DisconnectReason),
    /// Send one or more `HandshakeAck` reliable messages, each carrying at
    /// most `HANDSHAKE_ACK_CHUNK_SIZE` plugin-mods (§4.4 chunking rule).
    SendHandshakeAck(Vec<Vec<PluginModEntry>>),
    /// The connection reached `Ready` with no further reply needed.
    Ready,
}

/// Handles an ordinary (non-modded) `Hello`.
pub fn on_hello(conn: &mut Connection, config: &ServerConfig) -> HandshakeAction {
    if conn.handshake != HandshakeState::New {
        return HandshakeAction::Ignore;
    }
    conn.handshake = HandshakeState::HelloReceived;

    let reactor_requires_mods = match &config.reactor {
        ReactorConfig::Disabled(enabled) => *enabled,
        ReactorConfig::Detailed(details) => !details.allow_normal_clients,
    };
    if reactor_requires_mods {
        return HandshakeAction::Disconnect(DisconnectReason::Custom(
            "mod-framework required".into(),
        ));
    }

    conn.handshake = HandshakeState::Ready;
    HandshakeAction::Ready
}

/// Handles a modded `HelloMod`.
pub fn on_hello_mod(
    conn: &mut Connection,
    config: &ServerConfig,
    declared_mod_count: u16,
    plugins: &[PluginModEntry],
) -> HandshakeAction {
    if conn.handshake != HandshakeState::New {
        return HandshakeAction::Ignore;
    }
    conn.handshake = HandshakeState::HelloReceived;
    conn.uses_mod_framework = true;
    conn.declared_mod_count = declared_mod_count;

    if !config.is_version_allowed(&conn.client_version) {
        return HandshakeAction::Disconnect(DisconnectReason::IncorrectVersion);
    }

    if !config.reactor.is_enabled() {
        return HandshakeAction::Disconnect(DisconnectReason::Custom(
            "mod-framework not enabled".into(),
        ));
    }

    conn.handshake = if declared_mod_count == 0 {
        HandshakeState::Ready
    } else {
        HandshakeState::ModsAwaited
    };

    let chunks: Vec<Vec<PluginModEntry>> = plugins
        .chunks(HANDSHAKE_ACK_CHUNK_SIZE)
        .map(|chunk| chunk.to_vec())
        .collect();
    if chunks.is_empty() {
        HandshakeAction::SendHandshakeAck(vec![Vec::new()])
    } else {
        HandshakeAction::SendHandshakeAck(chunks)
    }
}

/// Handles a single mod-declaration sub-message (§4.4, §9's nonce-0 quirk is
/// handled by the reliability layer before this is invoked - see
/// `connection::Connection::accept_nonce`).
pub fn on_mod_declaration(conn: &mut Connection, declaration: ModDeclaration) {
    if conn.handshake != HandshakeState::ModsAwaited {
        return;
    }
    conn.add_mod(declaration);
    if conn.mods.len() == conn.declared_mod_count as usize {
        conn.handshake = HandshakeState::Ready;
    }
}

/// Join-time validation (§4.4): must be `Ready` with every declared mod in
/// hand, then checked against the server-wide mod policy.
pub fn validate_join(
    conn: &Connection,
    config: &ServerConfig,
    host_mods: Option<&[ModDeclaration]>,
) -> Result<(), DisconnectReason> {
    if conn.handshake != HandshakeState::Ready || conn.mods.len() < conn.declared_mod_count as usize
    {
        return Err(DisconnectReason::Custom(
            "haven't received all mods".into(),
        ));
    }

    let Some(details) = config.reactor.details() else {
        return Ok(());
    };

    for (mod_id, policy) in &details.mods {
        let declared = conn.has_mod(mod_id);
        match declared {
            None => {
                if !policy.is_optional() {
                    return Err(DisconnectReason::Custom(format!(
                        "missing required mod {mod_id}, any"
                    )));
                }
            }
            Some(decl) => {
                if policy.is_banned() {
                    return Err(DisconnectReason::Custom(format!(
                        "mod {mod_id} is banned on this server"
                    )));
                }
                if let Some(required_version) = policy.required_version() {
                    let satisfies = VersionReq::parse(required_version)
                        .and_then(|req| Version::parse(&decl.version).map(|ver| (req, ver)))
                        .is_ok_and(|(req, ver)| req.matches(&ver));
                    if !satisfies {
                        return Err(DisconnectReason::Custom(format!(
                            "mod {mod_id} version {} does not satisfy {required_version}",
                            decl.version
                        )));
                    }
                }
            }
        }
    }

    if !details.allow_extra_mods {
        for decl in &conn.mods {
            if !details.mods.contains_key(&decl.mod_id) {
                return Err(DisconnectReason::Custom(format!(
                    "mod {} is not in the server's allow list",
                    decl.mod_id
                )));
            }
        }
    }

    if details.require_host_mods
        && let Some(host_mods) = host_mods
    {
        let skip_client_side = details.block_client_side_only;
        for host_mod in host_mods {
            if skip_client_side && host_mod.side == ModSide::Clientside {
                continue;
            }
            match conn.has_mod(&host_mod.mod_id) {
                Some(joiner_mod) if joiner_mod.version == host_mod.version => {}
                _ => {
                    return Err(DisconnectReason::Custom(format!(
                        "host mod {} not matched by joiner",
                        host_mod.mod_id
                    )));
                }
            }
        }
        for joiner_mod in &conn.mods {
            if skip_client_side && joiner_mod.side == ModSide::Clientside {
                continue;
            }
            if !host_mods.iter().any(|h| h.mod_id == joiner_mod.mod_id) {
                return Err(DisconnectReason::Custom(format!(
                    "joiner mod {} not present on host",
                    joiner_mod.mod_id
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModPolicyEntry, ReactorDetails};
    use std::collections::HashMap;
    use std::net::SocketAddr;

    fn registry_with_conn() -> (crate::connection::ConnectionRegistry, SocketAddr) {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let mut registry = crate::connection::ConnectionRegistry::new();
        registry.get_or_create(addr);
        (registry, addr)
    }

    #[test]
    fn ordinary_hello_with_reactor_disabled_goes_ready() {
        let (mut registry, addr) = registry_with_conn();
        let c = registry.get_mut(&addr).unwrap();
        let config = ServerConfig::default();
        let action = on_hello(c, &config);
        assert!(matches!(action, HandshakeAction::Ready));
        assert_eq!(c.handshake, HandshakeState::Ready);
    }

    #[test]
    fn ordinary_hello_with_reactor_true_is_disconnected() {
        let (mut registry, addr) = registry_with_conn();
        let c = registry.get_mut(&addr).unwrap();
        let mut config = ServerConfig::default();
        config.reactor = ReactorConfig::Disabled(true);
        let action = on_hello(c, &config);
        assert!(matches!(action, HandshakeAction::Disconnect(_)));
    }

    #[test]
    fn hello_mod_with_reactor_disabled_is_disconnected() {
        let (mut registry, addr) = registry_with_conn();
        let c = registry.get_mut(&addr).unwrap();
        let config = ServerConfig::default();
        let action = on_hello_mod(c, &config, 1, &[]);
        assert!(matches!(action, HandshakeAction::Disconnect(_)));
    }

    #[test]
    fn hello_mod_accumulates_until_ready() {
        let (mut registry, addr) = registry_with_conn();
        let c = registry.get_mut(&addr).unwrap();
        let mut config = ServerConfig::default();
        config.reactor = ReactorConfig::Disabled(true);
        let action = on_hello_mod(c, &config, 2, &[]);
        assert!(matches!(action, HandshakeAction::SendHandshakeAck(_)));
        assert_eq!(c.handshake, HandshakeState::ModsAwaited);

        on_mod_declaration(
            c,
            ModDeclaration {
                net_id: 1,
                mod_id: "modA".into(),
                version: "1.0.0".into(),
                side: ModSide::Both,
            },
        );
        assert_eq!(c.handshake, HandshakeState::ModsAwaited);

        on_mod_declaration(
            c,
            ModDeclaration {
                net_id: 2,
                mod_id: "modB".into(),
                version: "1.0.0".into(),
                side: ModSide::Both,
            },
        );
        assert_eq!(c.handshake, HandshakeState::Ready);
    }

    #[test]
    fn excess_mod_declarations_are_discarded() {
        let (mut registry, addr) = registry_with_conn();
        let c = registry.get_mut(&addr).unwrap();
        c.handshake = HandshakeState::ModsAwaited;
        c.declared_mod_count = 1;
        on_mod_declaration(
            c,
            ModDeclaration {
                net_id: 1,
                mod_id: "modA".into(),
                version: "1.0.0".into(),
                side: ModSide::Both,
            },
        );
        on_mod_declaration(
            c,
            ModDeclaration {
                net_id: 2,
                mod_id: "modB".into(),
                version: "1.0.0".into(),
                side: ModSide::Both,
            },
        );
        assert_eq!(c.mods.len(), 1);
        assert_eq!(c.handshake, HandshakeState::Ready);
    }

    #[test]
    fn join_validation_rejects_missing_required_mod() {
        let (mut registry, addr) = registry_with_conn();
        let c = registry.get_mut(&addr).unwrap();
        c.handshake = HandshakeState::Ready;
        let mut mods = HashMap::new();
        mods.insert("modA".to_string(), ModPolicyEntry::Allowed(true));
        let config = ServerConfig {
            reactor: ReactorConfig::Detailed(ReactorDetails {
                mods,
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = validate_join(&c, &config, None);
        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains("modA"));
    }

    #[test]
    fn join_validation_passes_when_mod_satisfies_policy() {
        let (mut registry, addr) = registry_with_conn();
        let c = registry.get_mut(&addr).unwrap();
        c.handshake = HandshakeState::Ready;
        c.mods.push(ModDeclaration {
            net_id: 1,
            mod_id: "modA".into(),
            version: "1.0.0".into(),
            side: ModSide::Both,
        });
        let mut mods = HashMap::new();
        mods.insert(
            "modA".to_string(),
            ModPolicyEntry::Detailed {
                version: Some("1.0.0".into()),
                banned: false,
                optional: false,
            },
        );
        let config = ServerConfig {
            reactor: ReactorConfig::Detailed(ReactorDetails {
                mods,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(validate_join(&c, &config, None).is_ok());
    }

    #[test]
    fn join_validation_accepts_version_within_caret_range() {
        let (mut registry, addr) = registry_with_conn();
        let c = registry.get_mut(&addr).unwrap();
        c.handshake = HandshakeState::Ready;
        c.mods.push(ModDeclaration {
            net_id: 1,
            mod_id: "modA".into(),
            version: "1.2.0".into(),
            side: ModSide::Both,
        });
        let mut mods = HashMap::new();
        mods.insert(
            "modA".to_string(),
            ModPolicyEntry::Detailed {
                version: Some("^1.0.0".into()),
                banned: false,
                optional: false,
            },
        );
        let config = ServerConfig {
            reactor: ReactorConfig::Detailed(ReactorDetails {
                mods,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(validate_join(&c, &config, None).is_ok());
    }

    #[test]
    fn join_validation_rejects_version_outside_range() {
        let (mut registry, addr) = registry_with_conn();
        let c = registry.get_mut(&addr).unwrap();
        c.handshake = HandshakeState::Ready;
        c.mods.push(ModDeclaration {
            net_id: 1,
            mod_id: "modA".into(),
            version: "2.0.0".into(),
            side: ModSide::Both,
        });
        let mut mods = HashMap::new();
        mods.insert(
            "modA".to_string(),
            ModPolicyEntry::Detailed {
                version: Some("^1.0.0".into()),
                banned: false,
                optional: false,
            },
        );
        let config = ServerConfig {
            reactor: ReactorConfig::Detailed(ReactorDetails {
                mods,
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = validate_join(&c, &config, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("does not satisfy"));
    }
}
