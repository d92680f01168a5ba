//! Game settings carried inside `HostGame`/`AlterGame`. Mostly opaque to the
//! relay core - we only pick out the handful of fields the room registry and
//! the `GetGameList` filter actually need to look at.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::PacketError;

/// The subset of host-controlled game settings the server cares about, plus
/// an opaque tail for everything the client-side simulation owns (visual
/// tweaks, speed modifiers, etc.) that the relay never inspects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameSettings {
    pub max_players: u8,
    /// Bitmask of allowed maps; `GetGameList` matches a requester's map
    /// filter against this via a bitwise AND.
    pub map_mask: u8,
    /// `0` means "no impostor-count preference" on the requester side.
    pub impostor_count: u8,
    pub keyword: u32,
    /// Settings bytes the core never interprets, carried through verbatim.
    pub opaque_tail: Bytes,
}

impl Default for GameSettings {
    fn default() -> Self {
        GameSettings {
            max_players: 10,
            map_mask: 0xff,
            impostor_count: 1,
            keyword: 0,
            opaque_tail: Bytes::new(),
        }
    }
}

impl GameSettings {
    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.max_players);
        out.put_u8(self.map_mask);
        out.put_u8(self.impostor_count);
        out.put_u32_le(self.keyword);
        out.put_u16_le(self.opaque_tail.len() as u16);
        out.put_slice(&self.opaque_tail);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, PacketError> {
        if buf.len() < 7 {
            return Err(PacketError::Truncated("GameSettings"));
        }
        let max_players = buf.get_u8();
        let map_mask = buf.get_u8();
        let impostor_count = buf.get_u8();
        let keyword = buf.get_u32_le();
        let tail_len = buf.get_u16_le() as usize;
        if buf.len() < tail_len {
            return Err(PacketError::Truncated("GameSettings.opaque_tail"));
        }
        let opaque_tail = buf.split_to(tail_len);
        Ok(GameSettings {
            max_players,
            map_mask,
            impostor_count,
            keyword,
            opaque_tail,
        })
    }
}
