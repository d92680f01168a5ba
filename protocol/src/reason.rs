//! Structured disconnect reasons. A handful carry a fixed wire code; anything
//! without one falls back to a localized free-form string the client renders
//! directly (see §7 of the design: "user-facing failures always carry a
//! structured reason").

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::PacketError;

const CODE_CUSTOM: u8 = 0;
const CODE_INCORRECT_VERSION: u8 = 1;
const CODE_HACKING: u8 = 2;
const CODE_GAME_NOT_FOUND: u8 = 3;
const CODE_GAME_FULL: u8 = 4;
const CODE_GAME_STARTED: u8 = 5;
const CODE_BANNED: u8 = 6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DisconnectReason {
    IncorrectVersion,
    Hacking,
    GameNotFound,
    GameFull,
    GameStarted,
    Banned,
    /// A localized message key/string rendered verbatim by the client.
    Custom(String),
}

impl DisconnectReason {
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            DisconnectReason::IncorrectVersion => out.put_u8(CODE_INCORRECT_VERSION),
            DisconnectReason::Hacking => out.put_u8(CODE_HACKING),
            DisconnectReason::GameNotFound => out.put_u8(CODE_GAME_NOT_FOUND),
            DisconnectReason::GameFull => out.put_u8(CODE_GAME_FULL),
            DisconnectReason::GameStarted => out.put_u8(CODE_GAME_STARTED),
            DisconnectReason::Banned => out.put_u8(CODE_BANNED),
            DisconnectReason::Custom(text) => {
                out.put_u8(CODE_CUSTOM);
                let bytes = text.as_bytes();
                out.put_u16_le(bytes.len() as u16);
                out.put_slice(bytes);
            }
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, PacketError> {
        if buf.is_empty() {
            return Err(PacketError::Truncated("DisconnectReason"));
        }
        let code = buf.get_u8();
        Ok(match code {
            CODE_INCORRECT_VERSION => DisconnectReason::IncorrectVersion,
            CODE_HACKING => DisconnectReason::Hacking,
            CODE_GAME_NOT_FOUND => DisconnectReason::GameNotFound,
            CODE_GAME_FULL => DisconnectReason::GameFull,
            CODE_GAME_STARTED => DisconnectReason::GameStarted,
            CODE_BANNED => DisconnectReason::Banned,
            CODE_CUSTOM => {
                if buf.len() < 2 {
                    return Err(PacketError::Truncated("DisconnectReason.len"));
                }
                let len = buf.get_u16_le() as usize;
                if buf.len() < len {
                    return Err(PacketError::Truncated("DisconnectReason.text"));
                }
                let raw = buf.split_to(len);
                let text = String::from_utf8_lossy(&raw).into_owned();
                DisconnectReason::Custom(text)
            }
            other => return Err(PacketError::UnknownTag("DisconnectReason", other)),
        })
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::IncorrectVersion => write!(f, "IncorrectVersion"),
            DisconnectReason::Hacking => write!(f, "Hacking"),
            DisconnectReason::GameNotFound => write!(f, "GameNotFound"),
            DisconnectReason::GameFull => write!(f, "GameFull"),
            DisconnectReason::GameStarted => write!(f, "GameStarted"),
            DisconnectReason::Banned => write!(f, "Banned"),
            DisconnectReason::Custom(text) => write!(f, "{text}"),
        }
    }
}
