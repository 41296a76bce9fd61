/// A room advertised by the chat service's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    /// Bare room address, e.g. `1_ops@conf.hipchat.com`.
    pub jid: String,
    pub name: String,
    /// Numeric room id from the directory listing, when present.
    pub id: Option<String>,
}

/// Rooms known from the most recent directory listing, in listing order.
#[derive(Debug, Clone, Default)]
pub struct RoomDirectory {
    rooms: Vec<RoomInfo>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole directory. A JID listed twice keeps its first position
    /// and its last details.
    pub fn replace(&mut self, rooms: impl IntoIterator<Item = RoomInfo>) {
        self.rooms.clear();
        for room in rooms {
            match self.rooms.iter_mut().find(|known| known.jid == room.jid) {
                Some(known) => *known = room,
                None => self.rooms.push(room),
            }
        }
    }

    pub fn get(&self, jid: &str) -> Option<&RoomInfo> {
        self.rooms.iter().find(|room| room.jid == jid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoomInfo> {
        self.rooms.iter()
    }

    pub fn jids(&self) -> impl Iterator<Item = &str> {
        self.rooms.iter().map(|room| room.jid.as_str())
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
