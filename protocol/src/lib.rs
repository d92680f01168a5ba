//! The wire protocol: a stateless codec over a fixed catalog of tagged
//! message kinds, shared verbatim between the relay server and any client.

mod packet;
mod reason;
mod settings;
pub mod tags;

pub use packet::{
    ChatSide, GameDataChild, GameListEntry, GameMessage, HelloInfo, ModSide, PluginModEntry,
    RootPacket, RpcPayload, parse, write,
};
pub use reason::DisconnectReason;
pub use settings::GameSettings;

/// Selects dialect for the handful of tags whose meaning depends on which
/// way the datagram is travelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Serverbound,
    Clientbound,
}

/// Decode-time failures. Both variants are "log and continue" per the error
/// handling design - a malformed or unrecognized datagram never panics the
/// event loop.
#[derive(Clone, Copy, Debug, thiserror::Error)]
pub enum PacketError {
    #[error("truncated packet while reading {0}")]
    Truncated(&'static str),
    #[error("unknown tag {1:#x} for {0}")]
    UnknownTag(&'static str, u8),
}
