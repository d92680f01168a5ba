mod commands;
mod config;
mod connection;
mod errors;
mod handlers;
mod handshake;
mod operator;
mod relay;
mod reliability;
mod room;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::handlers::AppState;
use crate::operator::OperatorCommand;

const MAX_DATAGRAM_SIZE: usize = 2048;

#[tokio::main]
/// Loads `ServerConfig.json`, binds the UDP socket, and runs the single
/// cooperative event loop: socket receive, the 2000ms reliability ticker,
/// and operator console lines all serialize on one `tokio::select!` (§5).
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true),
        )
        .init();

    let config = match config::load_config().await {
        Ok(config) => config,
        Err(message) => {
            tracing::error!(message, "initial config load failed");
            panic!("initial config load failed: {message}");
        }
    };
    if config.socket.message_ordering.is_some() {
        tracing::warn!("socket.messageOrdering is set but has no effect (reserved, see DESIGN.md)");
    }
    let config = Arc::new(RwLock::new(config));

    let bind_addr = format!("0.0.0.0:{}", config.read().await.socket.port);
    let socket = match UdpSocket::bind(&bind_addr).await {
        Ok(socket) => socket,
        Err(err) => {
            tracing::error!(%err, %bind_addr, "failed to bind UDP socket");
            std::process::exit(1);
        }
    };
    tracing::info!(%bind_addr, "relay server listening");

    let mut state = AppState::default();
    let mut ticker = tokio::time::interval(reliability::TICK_INTERVAL);
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut recv_buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut recv_buf) => {
                let (len, remote) = match result {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(%err, "udp recv error");
                        continue;
                    }
                };
                let snapshot = config.read().await.clone();
                let outbound = handlers::handle_datagram(&mut state, &snapshot, remote, &recv_buf[..len]);
                send_all(&socket, outbound).await;
            }

            _ = ticker.tick() => {
                let actions = reliability::tick(&mut state.connections);
                let mut dead = Vec::new();
                for action in actions {
                    if let Err(err) = socket.send_to(&action.ping, action.remote).await {
                        tracing::warn!(%err, remote = %action.remote, "transient send error (ping)");
                    }
                    for bytes in &action.retransmits {
                        if let Err(err) = socket.send_to(bytes, action.remote).await {
                            tracing::warn!(%err, remote = %action.remote, "transient send error (retransmit)");
                        }
                    }
                    if action.dead {
                        tracing::warn!(remote = %action.remote, client_id = %action.client_id, "liveness failure, disconnecting");
                        dead.push(action.remote);
                    }
                }
                for remote in dead {
                    if let Some(conn) = state.connections.remove(&remote) {
                        if let Some(room_code) = conn.room {
                            if let Some(room) = state.rooms.get_mut(room_code) {
                                room.remove_member(conn.client_id);
                            }
                        }
                    }
                }
            }

            line = stdin_lines.next_line() => {
                let Ok(Some(line)) = line else { continue };
                if line.trim().is_empty() {
                    continue;
                }
                handle_operator_line(&mut state, &config, &line).await;
            }
        }
    }
}

async fn send_all(socket: &UdpSocket, outbound: Vec<(std::net::SocketAddr, bytes::Bytes)>) {
    for (remote, bytes) in outbound {
        if let Err(err) = socket.send_to(&bytes, remote).await {
            tracing::warn!(%err, %remote, "transient send error");
        }
    }
}

async fn handle_operator_line(state: &mut AppState, config: &Arc<RwLock<ServerConfig>>, line: &str) {
    if line.trim() == "reload" {
        match config::reload_config(config).await {
            Ok(()) => tracing::info!("configuration reloaded"),
            Err(message) => tracing::error!(message, "configuration reload failed"),
        }
        return;
    }

    let command = match operator::parse_operator_line(line) {
        Ok(command) => command,
        Err(message) => {
            tracing::warn!(message, "operator command rejected");
            return;
        }
    };

    match command {
        OperatorCommand::ListClients => {
            for conn in state.connections.iter() {
                println!("{} {} {}", conn.client_id, conn.remote, conn.username);
            }
        }
        OperatorCommand::ListRooms => {
            for room in state.rooms.iter() {
                println!(
                    "{} state={:?} members={} host={:?}",
                    room.code,
                    room.state,
                    room.members.len(),
                    room.host
                );
            }
        }
        OperatorCommand::ListPlugins => {
            for plugin in state.plugins.iter() {
                println!("{} {}", plugin.id, plugin.path);
            }
        }
        OperatorCommand::ListMods { plugin_id } => {
            println!("mod details for {plugin_id} are not tracked by the plugin stub");
        }
        OperatorCommand::ListPlayers { code } => {
            if let Some(room) = state.rooms.get(code) {
                for member in &room.members {
                    println!("{member}");
                }
            } else {
                println!("no such room: {code}");
            }
        }
        OperatorCommand::ListPov { code } => {
            if let Some(room) = state.rooms.get(code) {
                for perspective in &room.perspectives {
                    println!("perspective {} members={}", perspective.id, perspective.members.len());
                }
            } else {
                println!("no such room: {code}");
            }
        }
        OperatorCommand::Load { path } => {
            let id = state.plugins.load(path.clone());
            tracing::info!(id, path, "plugin registered (loader not re-implemented)");
        }
        OperatorCommand::Unload { plugin_id } => {
            if state.plugins.unload(&plugin_id) {
                tracing::info!(plugin_id, "plugin unregistered");
            } else {
                tracing::warn!(plugin_id, "no such plugin");
            }
        }
        OperatorCommand::Destroy { code, reason } => {
            if state.rooms.remove(code).is_some() {
                tracing::info!(code, ?reason, "room destroyed by operator");
            } else {
                tracing::warn!(code, "destroy: no such room");
            }
        }
        OperatorCommand::Disconnect(filter) => {
            tracing::info!(?filter, "operator disconnect (matching not yet targeted by field)");
        }
        OperatorCommand::Broadcast { text, room } => {
            tracing::info!(text, ?room, "operator broadcast requested");
        }
        OperatorCommand::Mem => {
            println!(
                "connections={} rooms={} plugins={}",
                state.connections.len(),
                state.rooms.len(),
                state.plugins.iter().count()
            );
        }
    }
}
