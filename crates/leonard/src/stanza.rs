//! Stanza classification and construction.
//!
//! Inbound elements are sorted into the few shapes the session cares about;
//! everything else is dropped here. Builders produce the exact requests the
//! HipChat flavour of XMPP expects during the handshake.

use minidom::{Element, NSChoice};
use tracing::debug;
use xmpp_parsers::ns;

use crate::rooms::RoomInfo;

pub const STARTUP_ID: &str = "startup";
pub const ROOMS_ID: &str = "rooms";
pub const USER_PROFILE_ID: &str = "userprofile";

pub const NS_HIPCHAT_STARTUP: &str = "http://hipchat.com/protocol/startup";
pub const NS_HIPCHAT_PROFILE: &str = "http://hipchat.com/protocol/profile";

/// MUC status code marking a presence that reflects our own occupant.
const SELF_PRESENCE_CODE: &str = "110";

/// An inbound stanza, reduced to what the session acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `<iq type='result'/>` correlated by `id`.
    IqResult {
        id: String,
        from: Option<String>,
        query: Option<Element>,
    },
    /// Any stanza with `type='error'`.
    Error {
        stanza: String,
        id: Option<String>,
        condition: Option<String>,
    },
    GroupChat(GroupChat),
    RoomPresence(RoomPresence),
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupChat {
    pub room: String,
    /// Occupant nick; `None` for messages from the room itself.
    pub nick: Option<String>,
    pub body: Option<String>,
    pub stanza: Element,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomPresence {
    pub room: String,
    pub nick: String,
    /// Real JID of the occupant from the `muc#user` item.
    pub jid: Option<String>,
    pub is_self: bool,
    pub available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnProfile {
    pub nick: Option<String>,
    pub mention_name: Option<String>,
}

pub fn classify(element: Element) -> Inbound {
    let stanza_type = element.attr("type").map(str::to_string);

    if element.name() == "iq" && stanza_type.as_deref() == Some("result") {
        let Some(id) = element.attr("id").map(str::to_string) else {
            debug!("Ignoring iq result without id");
            return Inbound::Ignored;
        };
        let from = element.attr("from").map(str::to_string);
        let query = element.get_child("query", NSChoice::Any).cloned();
        return Inbound::IqResult { id, from, query };
    }

    if stanza_type.as_deref() == Some("error") {
        let condition = element
            .get_child("error", NSChoice::Any)
            .and_then(|error| error.children().next())
            .map(|condition| condition.name().to_string());
        return Inbound::Error {
            stanza: element.name().to_string(),
            id: element.attr("id").map(str::to_string),
            condition,
        };
    }

    let name = element.name().to_string();
    match name.as_str() {
        "message" if stanza_type.as_deref() == Some("groupchat") => classify_group_chat(element),
        "presence" if element.get_child("x", ns::MUC_USER).is_some() => {
            classify_room_presence(&element, stanza_type.as_deref())
        }
        other => {
            debug!("Ignoring stanza: {other}");
            Inbound::Ignored
        }
    }
}

fn classify_group_chat(element: Element) -> Inbound {
    let Some(from) = element.attr("from") else {
        return Inbound::Ignored;
    };
    let (room, nick) = split_occupant(from);
    let body = element
        .get_child("body", NSChoice::Any)
        .map(Element::text);

    Inbound::GroupChat(GroupChat {
        room,
        nick,
        body,
        stanza: element,
    })
}

fn classify_room_presence(element: &Element, stanza_type: Option<&str>) -> Inbound {
    let Some(from) = element.attr("from") else {
        return Inbound::Ignored;
    };
    let Some(muc_user) = element.get_child("x", ns::MUC_USER) else {
        return Inbound::Ignored;
    };

    let (room, nick) = split_occupant(from);
    let is_self = muc_user
        .children()
        .filter(|child| child.name() == "status")
        .any(|status| status.attr("code") == Some(SELF_PRESENCE_CODE));
    let jid = muc_user
        .get_child("item", NSChoice::Any)
        .and_then(|item| item.attr("jid"))
        .map(bare_jid);

    Inbound::RoomPresence(RoomPresence {
        room,
        nick: nick.unwrap_or_default(),
        jid,
        is_self,
        available: stanza_type != Some("unavailable"),
    })
}

/// Split `room@service/nick` into the room and the nick.
fn split_occupant(jid: &str) -> (String, Option<String>) {
    match jid.split_once('/') {
        Some((room, nick)) => (room.to_string(), Some(nick.to_string())),
        None => (jid.to_string(), None),
    }
}

/// Strip the resource from a JID.
pub fn bare_jid(jid: &str) -> String {
    jid.split_once('/')
        .map_or(jid, |(bare, _)| bare)
        .to_string()
}

fn child_text(parent: &Element, name: &str) -> Option<String> {
    parent
        .get_child(name, NSChoice::Any)
        .map(|child| child.text().trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Read our own nick and mention name from a `startup` result.
pub fn parse_own_profile(query: &Element) -> OwnProfile {
    OwnProfile {
        nick: child_text(query, "name"),
        mention_name: child_text(query, "mention_name"),
    }
}

/// Read the room listing from a `rooms` result.
pub fn parse_room_items(query: &Element) -> Vec<RoomInfo> {
    query
        .children()
        .filter(|child| child.name() == "item")
        .filter_map(|item| {
            let Some(jid) = item.attr("jid") else {
                debug!("Skipping room item without jid");
                return None;
            };
            Some(RoomInfo {
                jid: jid.to_string(),
                name: item.attr("name").unwrap_or_default().to_string(),
                id: item
                    .get_child("x", NSChoice::Any)
                    .and_then(|x| child_text(x, "id")),
            })
        })
        .collect()
}

/// Read a user's mention name from a `userprofile` result.
pub fn parse_mention_name(query: &Element) -> Option<String> {
    child_text(query, "mention_name")
}

/// Initial presence: available and willing to chat.
pub fn build_available_presence() -> Element {
    Element::builder("presence", ns::JABBER_CLIENT)
        .attr("type", "available")
        .append(
            Element::builder("show", ns::JABBER_CLIENT)
                .append("chat")
                .build(),
        )
        .build()
}

/// Own-profile discovery, correlated as `startup`.
pub fn build_startup_query() -> Element {
    Element::builder("iq", ns::JABBER_CLIENT)
        .attr("type", "get")
        .attr("id", STARTUP_ID)
        .append(
            Element::builder("query", NS_HIPCHAT_STARTUP)
                .attr("send_auto_join_user_presences", "false")
                .build(),
        )
        .build()
}

/// Room listing request against the chat service directory, correlated as `rooms`.
pub fn build_room_discovery(directory: &str) -> Element {
    Element::builder("iq", ns::JABBER_CLIENT)
        .attr("to", directory)
        .attr("id", ROOMS_ID)
        .attr("type", "get")
        .append(
            Element::builder("query", ns::DISCO_ITEMS)
                .attr("include_archived", "false")
                .build(),
        )
        .build()
}

/// MUC join presence addressed to `<room>/<nick>`.
pub fn build_room_join(room: &str, nick: &str, from: &str) -> Element {
    Element::builder("presence", ns::JABBER_CLIENT)
        .attr("from", from)
        .attr("to", format!("{room}/{nick}"))
        .append(Element::builder("x", ns::MUC).build())
        .build()
}

/// Profile lookup for a room participant, correlated as `userprofile`.
pub fn build_profile_lookup(jid: &str) -> Element {
    Element::builder("iq", ns::JABBER_CLIENT)
        .attr("type", "get")
        .attr("to", jid)
        .attr("id", USER_PROFILE_ID)
        .append(Element::builder("query", NS_HIPCHAT_PROFILE).build())
        .build()
}

/// Group-chat message to a room.
pub fn build_group_message(room: &str, body: &str, from: &str) -> Element {
    Element::builder("message", ns::JABBER_CLIENT)
        .attr("from", from)
        .attr("to", room)
        .attr("type", "groupchat")
        .append(
            Element::builder("body", ns::JABBER_CLIENT)
                .append(body)
                .build(),
        )
        .build()
}
