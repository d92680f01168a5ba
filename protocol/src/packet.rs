//! The packet codec: stateless `parse`/`write` against the tagged message
//! catalog. Inner messages use Hazel framing (2-byte little-endian length,
//! 1-byte tag, payload); root packets are a single leading tag byte,
//! followed by a 2-byte big-endian nonce for every nonce-bearing variant.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::reason::DisconnectReason;
use crate::settings::GameSettings;
use crate::tags::*;
use crate::{Direction, PacketError};

/// Declared client identity, sent with both hello variants.
#[derive(Clone, Debug, PartialEq)]
pub struct HelloInfo {
    pub username: String,
    pub language: String,
    pub client_version: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModSide {
    Clientside,
    Serverside,
    Both,
}

impl ModSide {
    fn to_byte(&self) -> u8 {
        match self {
            ModSide::Clientside => 0,
            ModSide::Serverside => 1,
            ModSide::Both => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, PacketError> {
        match byte {
            0 => Ok(ModSide::Clientside),
            1 => Ok(ModSide::Serverside),
            2 => Ok(ModSide::Both),
            other => Err(PacketError::UnknownTag("ModSide", other)),
        }
    }
}

/// Which side of the chat UI a `SendChat` renders on: `Right` for a
/// player's own messages, `Left` for anything the client should treat as
/// coming from elsewhere - including the server's own replies (§4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatSide {
    Right,
    Left,
}

impl ChatSide {
    fn to_byte(&self) -> u8 {
        match self {
            ChatSide::Right => 0,
            ChatSide::Left => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, PacketError> {
        match byte {
            0 => Ok(ChatSide::Right),
            1 => Ok(ChatSide::Left),
            other => Err(PacketError::UnknownTag("ChatSide", other)),
        }
    }
}

/// The one RPC call the relay ever looks inside of: everything else is
/// relayed as opaque bytes since gameplay simulation isn't re-implemented
/// server-side.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcPayload {
    SendChat { text: String, side: ChatSide },
    Opaque(Bytes),
}

/// A single child of `GameData`/`GameDataTo` - one net-object action.
#[derive(Clone, Debug, PartialEq)]
pub enum GameDataChild {
    Rpc {
        net_id: u32,
        call_id: u8,
        payload: RpcPayload,
    },
    Despawn {
        net_id: u32,
    },
    Spawn {
        net_id: u32,
        class: u8,
    },
    Data {
        net_id: u32,
        payload: Bytes,
    },
    SceneChange {
        client_id: u16,
        scene: String,
    },
    ReadyUp {
        client_id: u16,
    },
    ClientInfo {
        client_id: u16,
        language: String,
    },
    ModDeclaration {
        net_id: u16,
        mod_id: String,
        version: String,
        side: ModSide,
    },
    /// Catch-all for any tag the decoder does not recognize. Dropped unless
    /// `socket.acceptUnknownGameData` enables opaque forwarding.
    UnknownGameData {
        tag: u8,
        data: Bytes,
    },
}

/// One entry in a `GetGameList` response.
#[derive(Clone, Debug, PartialEq)]
pub struct GameListEntry {
    pub code: i32,
    pub host_addr: std::net::SocketAddr,
    pub host_username: String,
    pub player_count: u8,
    pub age_seconds: u32,
    pub map_mask: u8,
    pub impostor_count: u8,
    pub max_players: u8,
}

/// A plugin mirrored to the client as a server-side mod, part of the
/// handshake acknowledgement chunking.
#[derive(Clone, Debug, PartialEq)]
pub struct PluginModEntry {
    pub net_id: u16,
    pub mod_id: String,
    pub version: String,
}

/// Children of the `Reliable` root packet.
#[derive(Clone, Debug, PartialEq)]
pub enum GameMessage {
    HostGame {
        settings: GameSettings,
    },
    JoinGame {
        code: i32,
    },
    StartGame {
        code: i32,
    },
    EndGame {
        code: i32,
    },
    AlterGame {
        code: i32,
        settings: GameSettings,
    },
    KickPlayer {
        code: i32,
        client_id: u16,
        banned: bool,
    },
    GameData {
        code: i32,
        children: Vec<GameDataChild>,
    },
    GameDataTo {
        code: i32,
        recipient: u16,
        children: Vec<GameDataChild>,
    },
    GetGameList {
        keyword: u32,
        map_mask: u8,
        impostor_count: u8,
    },
    RemoveGame {
        code: i32,
    },
    /// Clientbound: a join attempt was refused.
    JoinError {
        reason: DisconnectReason,
    },
    /// Clientbound: a join succeeded.
    JoinedGame {
        code: i32,
        client_id: u16,
        host_id: u16,
        members: Vec<u16>,
    },
    /// Clientbound: response to `GetGameList`.
    GameList {
        entries: Vec<GameListEntry>,
    },
    /// Clientbound: acknowledges a modded hello and mirrors up to 4 server
    /// plugins as mods in this chunk.
    HandshakeAck {
        mods: Vec<PluginModEntry>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum RootPacket {
    Reliable {
        nonce: u16,
        children: Vec<GameMessage>,
    },
    Hello {
        nonce: u16,
        hello: HelloInfo,
    },
    HelloMod {
        nonce: u16,
        hello: HelloInfo,
        mod_count: u16,
    },
    Disconnect {
        reason: Option<DisconnectReason>,
    },
    Acknowledge {
        nonce: u16,
        missing: u8,
    },
    Ping {
        nonce: u16,
    },
}

impl RootPacket {
    /// The nonce this packet is identified by, if any.
    pub fn nonce(&self) -> Option<u16> {
        match self {
            RootPacket::Reliable { nonce, .. }
            | RootPacket::Hello { nonce, .. }
            | RootPacket::HelloMod { nonce, .. }
            | RootPacket::Acknowledge { nonce, .. }
            | RootPacket::Ping { nonce } => Some(*nonce),
            RootPacket::Disconnect { .. } => None,
        }
    }
}

fn write_hazel_frame(tag: u8, payload: &[u8], out: &mut BytesMut) {
    out.put_u16_le(payload.len() as u16);
    out.put_u8(tag);
    out.put_slice(payload);
}

fn write_string(s: &str, out: &mut BytesMut) {
    out.put_u16_le(s.len() as u16);
    out.put_slice(s.as_bytes());
}

fn read_string(buf: &mut Bytes) -> Result<String, PacketError> {
    if buf.len() < 2 {
        return Err(PacketError::Truncated("string.len"));
    }
    let len = buf.get_u16_le() as usize;
    if buf.len() < len {
        return Err(PacketError::Truncated("string.data"));
    }
    let raw = buf.split_to(len);
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn write_hello(nonce: u16, tag: u8, hello: &HelloInfo, mod_count: Option<u16>, out: &mut BytesMut) {
    out.put_u8(tag);
    out.put_u16(nonce);
    write_string(&hello.username, out);
    write_string(&hello.language, out);
    write_string(&hello.client_version, out);
    if let Some(count) = mod_count {
        out.put_u16_le(count);
    }
}

fn read_hello(buf: &mut Bytes, nonce: u16) -> Result<HelloInfo, PacketError> {
    let username = read_string(buf)?;
    let language = read_string(buf)?;
    let client_version = read_string(buf)?;
    let _ = nonce;
    Ok(HelloInfo {
        username,
        language,
        client_version,
    })
}

/// Encodes a full datagram for transmission.
pub fn write(packet: &RootPacket, direction: Direction) -> BytesMut {
    let mut out = BytesMut::new();
    match packet {
        RootPacket::Hello { nonce, hello } => {
            write_hello(*nonce, ROOT_HELLO, hello, None, &mut out);
        }
        RootPacket::HelloMod {
            nonce,
            hello,
            mod_count,
        } => {
            write_hello(*nonce, ROOT_HELLO_MOD, hello, Some(*mod_count), &mut out);
        }
        RootPacket::Disconnect { reason } => {
            out.put_u8(ROOT_DISCONNECT);
            out.put_u8(reason.is_some() as u8);
            if let Some(reason) = reason {
                reason.encode(&mut out);
            }
        }
        RootPacket::Acknowledge { nonce, missing } => {
            out.put_u8(ROOT_ACKNOWLEDGE);
            out.put_u16(*nonce);
            out.put_u8(*missing);
        }
        RootPacket::Ping { nonce } => {
            out.put_u8(ROOT_PING);
            out.put_u16(*nonce);
        }
        RootPacket::Reliable { nonce, children } => {
            out.put_u8(ROOT_RELIABLE);
            out.put_u16(*nonce);
            for child in children {
                let mut payload = BytesMut::new();
                let tag = write_game_message(child, direction, &mut payload);
                write_hazel_frame(tag, &payload, &mut out);
            }
        }
    }
    out
}

/// Decodes one datagram. Unknown root tags are surfaced as an error so the
/// caller can log-and-continue per §7; malformed data is likewise an error.
pub fn parse(bytes: &[u8], direction: Direction) -> Result<RootPacket, PacketError> {
    if bytes.is_empty() {
        return Err(PacketError::Truncated("root.tag"));
    }
    let mut buf = Bytes::copy_from_slice(bytes);
    let tag = buf.get_u8();
    match tag {
        ROOT_HELLO => {
            if buf.len() < 2 {
                return Err(PacketError::Truncated("Hello.nonce"));
            }
            let nonce = buf.get_u16();
            let hello = read_hello(&mut buf, nonce)?;
            Ok(RootPacket::Hello { nonce, hello })
        }
        ROOT_HELLO_MOD => {
            if buf.len() < 2 {
                return Err(PacketError::Truncated("HelloMod.nonce"));
            }
            let nonce = buf.get_u16();
            let hello = read_hello(&mut buf, nonce)?;
            if buf.len() < 2 {
                return Err(PacketError::Truncated("HelloMod.mod_count"));
            }
            let mod_count = buf.get_u16_le();
            Ok(RootPacket::HelloMod {
                nonce,
                hello,
                mod_count,
            })
        }
        ROOT_DISCONNECT => {
            if buf.is_empty() {
                return Err(PacketError::Truncated("Disconnect.has_reason"));
            }
            let has_reason = buf.get_u8() != 0;
            let reason = if has_reason {
                Some(DisconnectReason::decode(&mut buf)?)
            } else {
                None
            };
            Ok(RootPacket::Disconnect { reason })
        }
        ROOT_ACKNOWLEDGE => {
            if buf.len() < 3 {
                return Err(PacketError::Truncated("Acknowledge"));
            }
            let nonce = buf.get_u16();
            let missing = buf.get_u8();
            Ok(RootPacket::Acknowledge { nonce, missing })
        }
        ROOT_PING => {
            if buf.len() < 2 {
                return Err(PacketError::Truncated("Ping"));
            }
            let nonce = buf.get_u16();
            Ok(RootPacket::Ping { nonce })
        }
        ROOT_RELIABLE => {
            if buf.len() < 2 {
                return Err(PacketError::Truncated("Reliable.nonce"));
            }
            let nonce = buf.get_u16();
            let mut children = Vec::new();
            while !buf.is_empty() {
                if buf.len() < 3 {
                    return Err(PacketError::Truncated("Reliable.frame_header"));
                }
                let len = buf.get_u16_le() as usize;
                let child_tag = buf.get_u8();
                if buf.len() < len {
                    return Err(PacketError::Truncated("Reliable.frame_payload"));
                }
                let mut payload = buf.split_to(len);
                children.push(read_game_message(child_tag, &mut payload, direction)?);
            }
            Ok(RootPacket::Reliable { nonce, children })
        }
        other => Err(PacketError::UnknownTag("RootPacket", other)),
    }
}

fn write_game_message(msg: &GameMessage, direction: Direction, out: &mut BytesMut) -> u8 {
    let _ = direction;
    match msg {
        GameMessage::HostGame { settings } => {
            settings.encode(out);
            GAME_HOST_GAME
        }
        GameMessage::JoinGame { code } => {
            out.put_i32(*code);
            GAME_JOIN_GAME
        }
        GameMessage::StartGame { code } => {
            out.put_i32(*code);
            GAME_START_GAME
        }
        GameMessage::EndGame { code } => {
            out.put_i32(*code);
            GAME_END_GAME
        }
        GameMessage::AlterGame { code, settings } => {
            out.put_i32(*code);
            settings.encode(out);
            GAME_ALTER_GAME
        }
        GameMessage::KickPlayer {
            code,
            client_id,
            banned,
        } => {
            out.put_i32(*code);
            out.put_u16(*client_id);
            out.put_u8(*banned as u8);
            GAME_KICK_PLAYER
        }
        GameMessage::GameData { code, children } => {
            out.put_i32(*code);
            write_game_data_children(children, out);
            GAME_DATA
        }
        GameMessage::GameDataTo {
            code,
            recipient,
            children,
        } => {
            out.put_i32(*code);
            out.put_u16(*recipient);
            write_game_data_children(children, out);
            GAME_DATA_TO
        }
        GameMessage::GetGameList {
            keyword,
            map_mask,
            impostor_count,
        } => {
            out.put_u32_le(*keyword);
            out.put_u8(*map_mask);
            out.put_u8(*impostor_count);
            GAME_GET_GAME_LIST
        }
        GameMessage::RemoveGame { code } => {
            out.put_i32(*code);
            GAME_REMOVE_GAME
        }
        GameMessage::JoinError { reason } => {
            reason.encode(out);
            GAME_JOIN_ERROR
        }
        GameMessage::JoinedGame {
            code,
            client_id,
            host_id,
            members,
        } => {
            out.put_i32(*code);
            out.put_u16(*client_id);
            out.put_u16(*host_id);
            out.put_u16(members.len() as u16);
            for member in members {
                out.put_u16(*member);
            }
            GAME_JOINED_GAME
        }
        GameMessage::GameList { entries } => {
            out.put_u16_le(entries.len() as u16);
            for entry in entries {
                write_game_list_entry(entry, out);
            }
            GAME_GAME_LIST
        }
        GameMessage::HandshakeAck { mods } => {
            out.put_u8(mods.len() as u8);
            for plugin_mod in mods {
                out.put_u16_le(plugin_mod.net_id);
                write_string(&plugin_mod.mod_id, out);
                write_string(&plugin_mod.version, out);
            }
            GAME_HANDSHAKE_ACK
        }
    }
}

fn write_game_list_entry(entry: &GameListEntry, out: &mut BytesMut) {
    out.put_i32(entry.code);
    match entry.host_addr {
        std::net::SocketAddr::V4(v4) => {
            out.put_u8(4);
            out.put_slice(&v4.ip().octets());
            out.put_u16(v4.port());
        }
        std::net::SocketAddr::V6(v6) => {
            out.put_u8(6);
            out.put_slice(&v6.ip().octets());
            out.put_u16(v6.port());
        }
    }
    write_string(&entry.host_username, out);
    out.put_u8(entry.player_count);
    out.put_u32_le(entry.age_seconds);
    out.put_u8(entry.map_mask);
    out.put_u8(entry.impostor_count);
    out.put_u8(entry.max_players);
}

fn read_game_list_entry(buf: &mut Bytes) -> Result<GameListEntry, PacketError> {
    if buf.len() < 5 {
        return Err(PacketError::Truncated("GameListEntry.code"));
    }
    let code = buf.get_i32();
    if buf.is_empty() {
        return Err(PacketError::Truncated("GameListEntry.addr_kind"));
    }
    let addr_kind = buf.get_u8();
    let host_addr = match addr_kind {
        4 => {
            if buf.len() < 6 {
                return Err(PacketError::Truncated("GameListEntry.addr_v4"));
            }
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            let port = buf.get_u16();
            std::net::SocketAddr::from((octets, port))
        }
        6 => {
            if buf.len() < 18 {
                return Err(PacketError::Truncated("GameListEntry.addr_v6"));
            }
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            let port = buf.get_u16();
            std::net::SocketAddr::from((octets, port))
        }
        other => return Err(PacketError::UnknownTag("GameListEntry.addr_kind", other)),
    };
    let host_username = read_string(buf)?;
    if buf.len() < 8 {
        return Err(PacketError::Truncated("GameListEntry.tail"));
    }
    let player_count = buf.get_u8();
    let age_seconds = buf.get_u32_le();
    let map_mask = buf.get_u8();
    let impostor_count = buf.get_u8();
    let max_players = buf.get_u8();
    Ok(GameListEntry {
        code,
        host_addr,
        host_username,
        player_count,
        age_seconds,
        map_mask,
        impostor_count,
        max_players,
    })
}

fn read_game_message(
    tag: u8,
    buf: &mut Bytes,
    direction: Direction,
) -> Result<GameMessage, PacketError> {
    let _ = direction;
    match tag {
        GAME_HOST_GAME => Ok(GameMessage::HostGame {
            settings: GameSettings::decode(buf)?,
        }),
        GAME_JOIN_GAME => {
            if buf.len() < 4 {
                return Err(PacketError::Truncated("JoinGame"));
            }
            Ok(GameMessage::JoinGame {
                code: buf.get_i32(),
            })
        }
        GAME_START_GAME => {
            if buf.len() < 4 {
                return Err(PacketError::Truncated("StartGame"));
            }
            Ok(GameMessage::StartGame {
                code: buf.get_i32(),
            })
        }
        GAME_END_GAME => {
            if buf.len() < 4 {
                return Err(PacketError::Truncated("EndGame"));
            }
            Ok(GameMessage::EndGame {
                code: buf.get_i32(),
            })
        }
        GAME_ALTER_GAME => {
            if buf.len() < 4 {
                return Err(PacketError::Truncated("AlterGame.code"));
            }
            let code = buf.get_i32();
            let settings = GameSettings::decode(buf)?;
            Ok(GameMessage::AlterGame { code, settings })
        }
        GAME_KICK_PLAYER => {
            if buf.len() < 7 {
                return Err(PacketError::Truncated("KickPlayer"));
            }
            let code = buf.get_i32();
            let client_id = buf.get_u16();
            let banned = buf.get_u8() != 0;
            Ok(GameMessage::KickPlayer {
                code,
                client_id,
                banned,
            })
        }
        GAME_DATA => {
            if buf.len() < 4 {
                return Err(PacketError::Truncated("GameData.code"));
            }
            let code = buf.get_i32();
            let children = read_game_data_children(buf)?;
            Ok(GameMessage::GameData { code, children })
        }
        GAME_DATA_TO => {
            if buf.len() < 6 {
                return Err(PacketError::Truncated("GameDataTo.header"));
            }
            let code = buf.get_i32();
            let recipient = buf.get_u16();
            let children = read_game_data_children(buf)?;
            Ok(GameMessage::GameDataTo {
                code,
                recipient,
                children,
            })
        }
        GAME_GET_GAME_LIST => {
            if buf.len() < 6 {
                return Err(PacketError::Truncated("GetGameList"));
            }
            let keyword = buf.get_u32_le();
            let map_mask = buf.get_u8();
            let impostor_count = buf.get_u8();
            Ok(GameMessage::GetGameList {
                keyword,
                map_mask,
                impostor_count,
            })
        }
        GAME_REMOVE_GAME => {
            if buf.len() < 4 {
                return Err(PacketError::Truncated("RemoveGame"));
            }
            Ok(GameMessage::RemoveGame {
                code: buf.get_i32(),
            })
        }
        GAME_JOIN_ERROR => Ok(GameMessage::JoinError {
            reason: DisconnectReason::decode(buf)?,
        }),
        GAME_JOINED_GAME => {
            if buf.len() < 8 {
                return Err(PacketError::Truncated("JoinedGame.header"));
            }
            let code = buf.get_i32();
            let client_id = buf.get_u16();
            let host_id = buf.get_u16();
            if buf.len() < 2 {
                return Err(PacketError::Truncated("JoinedGame.member_count"));
            }
            let member_count = buf.get_u16() as usize;
            if buf.len() < member_count * 2 {
                return Err(PacketError::Truncated("JoinedGame.members"));
            }
            let mut members = Vec::with_capacity(member_count);
            for _ in 0..member_count {
                members.push(buf.get_u16());
            }
            Ok(GameMessage::JoinedGame {
                code,
                client_id,
                host_id,
                members,
            })
        }
        GAME_GAME_LIST => {
            if buf.len() < 2 {
                return Err(PacketError::Truncated("GameList.count"));
            }
            let count = buf.get_u16_le() as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(read_game_list_entry(buf)?);
            }
            Ok(GameMessage::GameList { entries })
        }
        GAME_HANDSHAKE_ACK => {
            if buf.is_empty() {
                return Err(PacketError::Truncated("HandshakeAck.count"));
            }
            let count = buf.get_u8() as usize;
            let mut mods = Vec::with_capacity(count);
            for _ in 0..count {
                if buf.len() < 2 {
                    return Err(PacketError::Truncated("HandshakeAck.net_id"));
                }
                let net_id = buf.get_u16_le();
                let mod_id = read_string(buf)?;
                let version = read_string(buf)?;
                mods.push(PluginModEntry {
                    net_id,
                    mod_id,
                    version,
                });
            }
            Ok(GameMessage::HandshakeAck { mods })
        }
        other => Err(PacketError::UnknownTag("GameMessage", other)),
    }
}

fn write_game_data_children(children: &[GameDataChild], out: &mut BytesMut) {
    out.put_u16_le(children.len() as u16);
    for child in children {
        let mut payload = BytesMut::new();
        let tag = write_game_data_child(child, &mut payload);
        write_hazel_frame(tag, &payload, out);
    }
}

fn read_game_data_children(buf: &mut Bytes) -> Result<Vec<GameDataChild>, PacketError> {
    if buf.len() < 2 {
        return Err(PacketError::Truncated("GameData.child_count"));
    }
    let count = buf.get_u16_le() as usize;
    let mut children = Vec::with_capacity(count);
    for _ in 0..count {
        if buf.len() < 3 {
            return Err(PacketError::Truncated("GameData.child_frame_header"));
        }
        let len = buf.get_u16_le() as usize;
        let tag = buf.get_u8();
        if buf.len() < len {
            return Err(PacketError::Truncated("GameData.child_frame_payload"));
        }
        let mut payload = buf.split_to(len);
        children.push(read_game_data_child(tag, &mut payload)?);
    }
    Ok(children)
}

fn write_game_data_child(child: &GameDataChild, out: &mut BytesMut) -> u8 {
    match child {
        GameDataChild::Rpc {
            net_id,
            call_id,
            payload,
        } => {
            out.put_u32_le(*net_id);
            out.put_u8(*call_id);
            match payload {
                RpcPayload::SendChat { text, side } => {
                    write_string(text, out);
                    out.put_u8(side.to_byte());
                }
                RpcPayload::Opaque(bytes) => out.put_slice(bytes),
            }
            DATA_RPC
        }
        GameDataChild::Despawn { net_id } => {
            out.put_u32_le(*net_id);
            DATA_DESPAWN
        }
        GameDataChild::Spawn { net_id, class } => {
            out.put_u32_le(*net_id);
            out.put_u8(*class);
            DATA_SPAWN
        }
        GameDataChild::Data { net_id, payload } => {
            out.put_u32_le(*net_id);
            out.put_slice(payload);
            DATA_DATA
        }
        GameDataChild::SceneChange { client_id, scene } => {
            out.put_u16_le(*client_id);
            write_string(scene, out);
            DATA_SCENE_CHANGE
        }
        GameDataChild::ReadyUp { client_id } => {
            out.put_u16_le(*client_id);
            DATA_READY_UP
        }
        GameDataChild::ClientInfo {
            client_id,
            language,
        } => {
            out.put_u16_le(*client_id);
            write_string(language, out);
            DATA_CLIENT_INFO
        }
        GameDataChild::ModDeclaration {
            net_id,
            mod_id,
            version,
            side,
        } => {
            out.put_u16_le(*net_id);
            write_string(mod_id, out);
            write_string(version, out);
            out.put_u8(side.to_byte());
            DATA_MOD_DECLARATION
        }
        GameDataChild::UnknownGameData { tag, data } => {
            out.put_slice(data);
            *tag
        }
    }
}

fn read_game_data_child(tag: u8, buf: &mut Bytes) -> Result<GameDataChild, PacketError> {
    match tag {
        DATA_RPC => {
            if buf.len() < 5 {
                return Err(PacketError::Truncated("Rpc.header"));
            }
            let net_id = buf.get_u32_le();
            let call_id = buf.get_u8();
            let payload = if call_id == RPC_CALL_SEND_CHAT {
                let text = read_string(buf)?;
                if buf.is_empty() {
                    return Err(PacketError::Truncated("SendChat.side"));
                }
                let side = ChatSide::from_byte(buf.get_u8())?;
                RpcPayload::SendChat { text, side }
            } else {
                RpcPayload::Opaque(buf.split_off(0))
            };
            Ok(GameDataChild::Rpc {
                net_id,
                call_id,
                payload,
            })
        }
        DATA_DESPAWN => {
            if buf.len() < 4 {
                return Err(PacketError::Truncated("Despawn"));
            }
            Ok(GameDataChild::Despawn {
                net_id: buf.get_u32_le(),
            })
        }
        DATA_SPAWN => {
            if buf.len() < 5 {
                return Err(PacketError::Truncated("Spawn"));
            }
            let net_id = buf.get_u32_le();
            let class = buf.get_u8();
            Ok(GameDataChild::Spawn { net_id, class })
        }
        DATA_DATA => {
            if buf.len() < 4 {
                return Err(PacketError::Truncated("Data.net_id"));
            }
            let net_id = buf.get_u32_le();
            let payload = buf.split_off(0);
            Ok(GameDataChild::Data { net_id, payload })
        }
        DATA_SCENE_CHANGE => {
            if buf.len() < 2 {
                return Err(PacketError::Truncated("SceneChange.client_id"));
            }
            let client_id = buf.get_u16_le();
            let scene = read_string(buf)?;
            Ok(GameDataChild::SceneChange { client_id, scene })
        }
        DATA_READY_UP => {
            if buf.len() < 2 {
                return Err(PacketError::Truncated("ReadyUp"));
            }
            Ok(GameDataChild::ReadyUp {
                client_id: buf.get_u16_le(),
            })
        }
        DATA_CLIENT_INFO => {
            if buf.len() < 2 {
                return Err(PacketError::Truncated("ClientInfo.client_id"));
            }
            let client_id = buf.get_u16_le();
            let language = read_string(buf)?;
            Ok(GameDataChild::ClientInfo {
                client_id,
                language,
            })
        }
        DATA_MOD_DECLARATION => {
            if buf.len() < 2 {
                return Err(PacketError::Truncated("ModDeclaration.net_id"));
            }
            let net_id = buf.get_u16_le();
            let mod_id = read_string(buf)?;
            let version = read_string(buf)?;
            if buf.is_empty() {
                return Err(PacketError::Truncated("ModDeclaration.side"));
            }
            let side = ModSide::from_byte(buf.get_u8())?;
            Ok(GameDataChild::ModDeclaration {
                net_id,
                mod_id,
                version,
                side,
            })
        }
        other => Ok(GameDataChild::UnknownGameData {
            tag: other,
            data: buf.split_off(0),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: RootPacket) {
        let bytes = write(&packet, Direction::Serverbound);
        let decoded = parse(&bytes, Direction::Serverbound).expect("decode");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn hello_roundtrips() {
        roundtrip(RootPacket::Hello {
            nonce: 1,
            hello: HelloInfo {
                username: "carl".into(),
                language: "en".into(),
                client_version: "2024.1.1".into(),
            },
        });
    }

    #[test]
    fn hello_mod_roundtrips() {
        roundtrip(RootPacket::HelloMod {
            nonce: 7,
            hello: HelloInfo {
                username: "carl".into(),
                language: "en".into(),
                client_version: "2024.1.1".into(),
            },
            mod_count: 3,
        });
    }

    #[test]
    fn ping_and_ack_roundtrip() {
        roundtrip(RootPacket::Ping { nonce: 42 });
        roundtrip(RootPacket::Acknowledge {
            nonce: 42,
            missing: 0b0000_0001,
        });
    }

    #[test]
    fn disconnect_with_and_without_reason_roundtrips() {
        roundtrip(RootPacket::Disconnect { reason: None });
        roundtrip(RootPacket::Disconnect {
            reason: Some(DisconnectReason::Hacking),
        });
        roundtrip(RootPacket::Disconnect {
            reason: Some(DisconnectReason::Custom("bad mod version".into())),
        });
    }

    #[test]
    fn reliable_with_game_data_children_roundtrips() {
        roundtrip(RootPacket::Reliable {
            nonce: 5,
            children: vec![
                GameMessage::HostGame {
                    settings: GameSettings::default(),
                },
                GameMessage::GameData {
                    code: 12345,
                    children: vec![
                        GameDataChild::Rpc {
                            net_id: 1,
                            call_id: RPC_CALL_SEND_CHAT,
                            payload: RpcPayload::SendChat {
                                text: "/kick bob".into(),
                                side: ChatSide::Right,
                            },
                        },
                        GameDataChild::Data {
                            net_id: 2,
                            payload: Bytes::from_static(&[1, 2, 3]),
                        },
                        GameDataChild::UnknownGameData {
                            tag: 0x42,
                            data: Bytes::from_static(&[9, 9]),
                        },
                    ],
                },
            ],
        });
    }

    #[test]
    fn send_chat_left_side_roundtrips() {
        roundtrip(RootPacket::Reliable {
            nonce: 6,
            children: vec![GameMessage::GameData {
                code: 12345,
                children: vec![GameDataChild::Rpc {
                    net_id: 0,
                    call_id: RPC_CALL_SEND_CHAT,
                    payload: RpcPayload::SendChat {
                        text: "No command with name: foo".into(),
                        side: ChatSide::Left,
                    },
                }],
            }],
        });
    }

    #[test]
    fn unknown_root_tag_is_an_error() {
        let err = parse(&[0xfe], Direction::Serverbound).unwrap_err();
        assert!(matches!(err, PacketError::UnknownTag("RootPacket", 0xfe)));
    }

    #[test]
    fn truncated_packet_is_an_error() {
        let err = parse(&[ROOT_RELIABLE, 0x00], Direction::Serverbound).unwrap_err();
        assert!(matches!(err, PacketError::Truncated(_)));
    }

    #[test]
    fn unknown_game_data_tag_is_kept_not_dropped_by_codec() {
        // Dropping unknown game-data tags is a relay policy decision, not a
        // codec one - the codec always decodes into `UnknownGameData`.
        roundtrip(RootPacket::Reliable {
            nonce: 1,
            children: vec![GameMessage::GameData {
                code: 1,
                children: vec![GameDataChild::UnknownGameData {
                    tag: 0xaa,
                    data: Bytes::from_static(&[1, 2, 3, 4]),
                }],
            }],
        });
    }
}
