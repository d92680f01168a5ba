//! Room data model and code allocation (§3, §4.5). Generalized from the
//! teacher's `Room`/`AppState` structs in `lobby.rs` - one channel pair per
//! room there becomes full membership/ban/perspective tracking here, since
//! the relay has no broadcast channel primitive of its own over raw UDP.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Instant;

use protocol::GameSettings;
use rand::Rng;

use crate::config::CodeScheme;
use crate::connection::ClientId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomState {
    NotStarted,
    Started,
    Ended,
    Destroyed,
}

/// A single filter rule applied to a perspective's outgoing path (§4.6 step
/// 2). Kept as plain data, not a closure, so it stays testable and the
/// relay's decision is inspectable from the operator surface (`list pov`).
#[derive(Clone, Debug, Default)]
pub struct OutgoingFilter {
    pub blocked_rpc_call_ids: HashSet<u8>,
}

impl OutgoingFilter {
    pub fn permits(&self, child: &protocol::GameDataChild) -> bool {
        match child {
            protocol::GameDataChild::Rpc { call_id, .. } => {
                !self.blocked_rpc_call_ids.contains(call_id)
            }
            _ => true,
        }
    }
}

/// A filtered sub-view of a room owned by a subset of players (§3, §4.6).
#[derive(Clone, Debug, Default)]
pub struct Perspective {
    pub id: u32,
    pub members: HashSet<ClientId>,
    pub outgoing_filter: OutgoingFilter,
}

impl Perspective {
    pub fn new(id: u32) -> Self {
        Perspective {
            id,
            members: HashSet::new(),
            outgoing_filter: OutgoingFilter::default(),
        }
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.members.contains(&client_id)
    }
}

pub struct Room {
    pub code: i32,
    pub created_at: Instant,
    pub state: RoomState,
    pub settings: GameSettings,
    pub host: Option<ClientId>,
    /// Insertion order is preserved; host election picks the lowest id from
    /// this set, not the insertion order (§9).
    pub members: Vec<ClientId>,
    pub bans: HashSet<IpAddr>,
    pub perspectives: Vec<Perspective>,
}

impl Room {
    pub fn new(code: i32, settings: GameSettings) -> Self {
        Room {
            code,
            created_at: Instant::now(),
            state: RoomState::NotStarted,
            settings,
            host: None,
            members: Vec::new(),
            bans: HashSet::new(),
            perspectives: Vec::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.settings.max_players as usize
    }

    pub fn is_banned(&self, addr: IpAddr) -> bool {
        self.bans.contains(&addr)
    }

    /// Adds a member, designating them host if the room has none yet (§4.6
    /// "Join").
    pub fn add_member(&mut self, client_id: ClientId) {
        self.members.push(client_id);
        if self.host.is_none() {
            self.host = Some(client_id);
        }
    }

    /// Removes a member. If they were host and members remain, elects a new
    /// host deterministically (lowest client-id, §3/§9). Returns `true` if a
    /// host election happened.
    pub fn remove_member(&mut self, client_id: ClientId) -> bool {
        self.members.retain(|m| *m != client_id);
        if self.host == Some(client_id) {
            self.host = self.members.iter().min_by_key(|m| m.0).copied();
            true
        } else {
            false
        }
    }

    pub fn is_host(&self, client_id: ClientId) -> bool {
        self.host == Some(client_id)
    }

    pub fn perspective_of(&self, client_id: ClientId) -> Option<&Perspective> {
        self.perspectives.iter().find(|p| p.contains(client_id))
    }

    pub fn perspective_of_mut(&mut self, client_id: ClientId) -> Option<&mut Perspective> {
        self.perspectives.iter_mut().find(|p| p.contains(client_id))
    }
}

/// Letters used by both code schemes (A-Z, no digits - matches the
/// upstream client's four/six-letter room codes).
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn scheme_len(scheme: CodeScheme) -> usize {
    match scheme {
        CodeScheme::V1 => 4,
        CodeScheme::V2 => 6,
    }
}

/// Packs letters into the same integer encoding the client protocol expects
/// (base-26 big-endian over the letter indices, matching `RESERVED_ROOM_CODE`
/// being a plain small integer rather than a packed letter value).
fn pack_code(letters: &[u8]) -> i32 {
    let mut code: i32 = 0;
    for &letter in letters {
        code = code * 26 + (letter - b'A') as i32;
    }
    code
}

pub struct RoomRegistry {
    rooms: HashMap<i32, Room>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        RoomRegistry {
            rooms: HashMap::new(),
        }
    }

    /// Draws a code in `scheme`'s space that is neither reserved nor already
    /// in use (§4.5).
    pub fn generate_code(&self, scheme: CodeScheme) -> i32 {
        let len = scheme_len(scheme);
        let mut rng = rand::thread_rng();
        loop {
            let letters: Vec<u8> = (0..len).map(|_| ALPHABET[rng.gen_range(0..26)]).collect();
            let code = pack_code(&letters);
            if code != protocol::tags::RESERVED_ROOM_CODE && !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    /// Creates a room at `code`, failing if the code is already in use
    /// (§4.5).
    pub fn create_room(&mut self, code: i32, settings: GameSettings) -> Result<(), String> {
        if self.rooms.contains_key(&code) {
            return Err(format!("room code {code} already in use"));
        }
        self.rooms.insert(code, Room::new(code, settings));
        Ok(())
    }

    pub fn get(&self, code: i32) -> Option<&Room> {
        self.rooms.get(&code)
    }

    pub fn get_mut(&mut self, code: i32) -> Option<&mut Room> {
        self.rooms.get_mut(&code)
    }

    pub fn remove(&mut self, code: i32) -> Option<Room> {
        self.rooms.remove(&code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_code_never_returns_reserved_value() {
        let registry = RoomRegistry::new();
        for _ in 0..500 {
            assert_ne!(
                registry.generate_code(CodeScheme::V1),
                protocol::tags::RESERVED_ROOM_CODE
            );
        }
    }

    #[test]
    fn create_room_rejects_duplicate_code() {
        let mut registry = RoomRegistry::new();
        registry.create_room(7, GameSettings::default()).unwrap();
        assert!(registry.create_room(7, GameSettings::default()).is_err());
    }

    #[test]
    fn host_is_designated_on_first_member() {
        let mut room = Room::new(1, GameSettings::default());
        room.add_member(ClientId(3));
        assert!(room.is_host(ClientId(3)));
        room.add_member(ClientId(4));
        assert!(room.is_host(ClientId(3)));
    }

    #[test]
    fn host_election_picks_lowest_remaining_client_id() {
        let mut room = Room::new(1, GameSettings::default());
        room.add_member(ClientId(5));
        room.add_member(ClientId(2));
        room.add_member(ClientId(9));
        assert!(room.is_host(ClientId(5)));
        let elected = room.remove_member(ClientId(5));
        assert!(elected);
        assert!(room.is_host(ClientId(2)));
    }

    #[test]
    fn host_is_none_when_room_becomes_empty() {
        let mut room = Room::new(1, GameSettings::default());
        room.add_member(ClientId(1));
        room.remove_member(ClientId(1));
        assert_eq!(room.host, None);
    }

    #[test]
    fn outgoing_filter_blocks_configured_rpc_call_ids() {
        let mut filter = OutgoingFilter::default();
        filter.blocked_rpc_call_ids.insert(9);
        let blocked = protocol::GameDataChild::Rpc {
            net_id: 1,
            call_id: 9,
            payload: protocol::RpcPayload::Opaque(bytes::Bytes::new()),
        };
        let allowed = protocol::GameDataChild::Rpc {
            net_id: 1,
            call_id: 1,
            payload: protocol::RpcPayload::Opaque(bytes::Bytes::new()),
        };
        assert!(!filter.permits(&blocked));
        assert!(filter.permits(&allowed));
    }
}
