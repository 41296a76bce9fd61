//! Chat messages in and out, and the view of the session handed to handlers.

use minidom::Element;
use tracing::{debug, warn};

use crate::identity::{IdentityTracker, SelfIdentity};
use crate::rooms::RoomDirectory;
use crate::stanza;
use crate::transport::OutboundSender;

/// A group-chat message addressed to a joined room.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Bare JID of the author when known, else the occupant address `<room>/<nick>`.
    pub sender: String,
    pub nick: Option<String>,
    pub room: String,
    pub body: String,
    pub raw: Element,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub room: String,
    pub body: String,
    /// JID of the user to address with an `@mention` prefix.
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn new(room: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            body: body.into(),
            reply_to: None,
        }
    }

    pub fn reply_to(mut self, jid: impl Into<String>) -> Self {
        self.reply_to = Some(jid.into());
        self
    }
}

/// Borrowed view of the session passed to every handler invocation.
pub struct BotContext<'a> {
    outbound: &'a OutboundSender,
    identity: &'a SelfIdentity,
    rooms: &'a RoomDirectory,
    joined: &'a [String],
    users: &'a IdentityTracker,
}

impl<'a> BotContext<'a> {
    pub(crate) fn new(
        outbound: &'a OutboundSender,
        identity: &'a SelfIdentity,
        rooms: &'a RoomDirectory,
        joined: &'a [String],
        users: &'a IdentityTracker,
    ) -> Self {
        Self {
            outbound,
            identity,
            rooms,
            joined,
            users,
        }
    }

    /// Queue a group-chat message. With `reply_to` set, the body is prefixed
    /// with `@<mention name> ` when that user's mention name is known.
    pub fn send_message(&self, message: OutboundMessage) {
        let body = match message.reply_to.as_deref() {
            Some(jid) => match self.users.get(jid).and_then(|u| u.mention_name.as_deref()) {
                Some(mention) => format!("@{mention} {}", message.body),
                None => {
                    warn!(jid, room = %message.room, "No mention name for reply target, sending unaddressed");
                    message.body
                }
            },
            None => message.body,
        };

        debug!(room = %message.room, "Sending group message");
        self.outbound.send(stanza::build_group_message(
            &message.room,
            &body,
            &self.identity.full_jid,
        ));
    }

    /// Answer `to` in its room, addressed to its author.
    pub fn reply(&self, to: &InboundMessage, body: impl Into<String>) {
        self.send_message(OutboundMessage::new(&to.room, body).reply_to(&to.sender));
    }

    pub fn rooms(&self) -> &RoomDirectory {
        self.rooms
    }

    /// Room JIDs the session sent joins for.
    pub fn joined_rooms(&self) -> &[String] {
        self.joined
    }

    pub fn users(&self) -> &IdentityTracker {
        self.users
    }

    pub fn identity(&self) -> &SelfIdentity {
        self.identity
    }
}
