//! The bot session: handshake, presence tracking and message routing.

use std::fmt;

use minidom::Element;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SessionConfig};
use crate::dispatch::{self, DispatchOutcome};
use crate::error::{RegistryError, SessionError};
use crate::identity::{IdentityTracker, SelfIdentity};
use crate::keepalive::Keepalive;
use crate::message::{BotContext, InboundMessage, OutboundMessage};
use crate::registry::HandlerRegistry;
use crate::rooms::RoomDirectory;
use crate::stanza::{self, GroupChat, Inbound, RoomPresence};
use crate::transport::{OutboundSender, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Disconnected,
    Negotiating,
    AwaitingProfile,
    AwaitingRooms,
    Joining,
    Active,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Negotiating => "negotiating",
            SessionState::AwaitingProfile => "awaiting-profile",
            SessionState::AwaitingRooms => "awaiting-rooms",
            SessionState::Joining => "joining",
            SessionState::Active => "active",
        };
        f.write_str(name)
    }
}

/// A handshake step the server answered with an error. The session stays in
/// `state` until the transport goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stall {
    pub state: SessionState,
    pub request_id: String,
    pub condition: Option<String>,
}

pub struct Session {
    settings: SessionConfig,
    identity: SelfIdentity,
    state: SessionState,
    transitions: Vec<SessionState>,
    stall: Option<Stall>,
    mention_pattern: Option<Regex>,
    rooms: RoomDirectory,
    joined: Vec<String>,
    users: IdentityTracker,
    registry: HandlerRegistry,
    outbound: OutboundSender,
    keepalive: Option<Keepalive>,
}

impl Session {
    pub fn new(config: &Config, registry: HandlerRegistry, outbound: OutboundSender) -> Self {
        Self {
            settings: config.session.clone(),
            identity: SelfIdentity::new(&config.account.jid, config.account.full_jid()),
            state: SessionState::Disconnected,
            transitions: vec![SessionState::Disconnected],
            stall: None,
            mention_pattern: None,
            rooms: RoomDirectory::new(),
            joined: Vec::new(),
            users: IdentityTracker::new(),
            registry,
            outbound,
            keepalive: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered so far, starting with `Disconnected`.
    pub fn transitions(&self) -> &[SessionState] {
        &self.transitions
    }

    pub fn stall(&self) -> Option<&Stall> {
        self.stall.as_ref()
    }

    pub fn identity(&self) -> &SelfIdentity {
        &self.identity
    }

    pub fn mention_pattern(&self) -> Option<&Regex> {
        self.mention_pattern.as_ref()
    }

    pub fn rooms(&self) -> &RoomDirectory {
        &self.rooms
    }

    /// Rooms joined after the last room discovery.
    pub fn joined_rooms(&self) -> &[String] {
        &self.joined
    }

    pub fn users(&self) -> &IdentityTracker {
        &self.users
    }

    pub fn keepalive_running(&self) -> bool {
        self.keepalive.as_ref().is_some_and(Keepalive::is_running)
    }

    pub fn send_message(&self, message: OutboundMessage) {
        self.context().send_message(message);
    }

    pub fn on_message<F>(&mut self, pattern: &str, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&BotContext<'_>, &InboundMessage, &[Option<String>]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.registry.on_message(pattern, handler)
    }

    pub fn on_mention<F>(&mut self, pattern: &str, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&BotContext<'_>, &InboundMessage, &[Option<String>]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.registry.on_mention(pattern, handler)
    }

    /// Process one transport event to completion. Returns an error when the
    /// transport is gone and the session cannot continue.
    pub fn handle_event(&mut self, event: TransportEvent) -> Result<(), SessionError> {
        match event {
            TransportEvent::Connected => {
                self.on_connected();
                Ok(())
            }
            TransportEvent::Stanza(element) => {
                self.on_stanza(element);
                Ok(())
            }
            TransportEvent::Disconnected { reason } => {
                warn!(state = %self.state, %reason, "Transport disconnected");
                self.teardown();
                Err(SessionError::TransportLost(reason))
            }
            TransportEvent::Error { reason } => {
                error!(state = %self.state, %reason, "Transport error");
                self.teardown();
                Err(SessionError::TransportLost(reason))
            }
        }
    }

    fn context(&self) -> BotContext<'_> {
        BotContext::new(
            &self.outbound,
            &self.identity,
            &self.rooms,
            &self.joined,
            &self.users,
        )
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "Session state change");
        self.state = next;
        self.transitions.push(next);
    }

    fn teardown(&mut self) {
        self.keepalive = None;
        if self.state != SessionState::Disconnected {
            self.transition(SessionState::Disconnected);
        }
    }

    fn on_connected(&mut self) {
        if self.state != SessionState::Disconnected {
            warn!(state = %self.state, "Ignoring duplicate connected event");
            return;
        }
        info!(jid = %self.identity.full_jid, "Connected, starting handshake");
        self.transition(SessionState::Negotiating);

        self.outbound.send(stanza::build_available_presence());
        self.keepalive = Some(Keepalive::spawn(
            self.outbound.clone(),
            self.settings.keepalive_interval(),
        ));
        self.outbound.send(stanza::build_startup_query());

        self.transition(SessionState::AwaitingProfile);
    }

    fn on_stanza(&mut self, element: Element) {
        match stanza::classify(element) {
            Inbound::IqResult { id, from, query } => self.on_result(&id, from, query),
            Inbound::Error {
                stanza: kind,
                id,
                condition,
            } => self.on_error(&kind, id, condition),
            Inbound::GroupChat(chat) => self.on_group_chat(chat),
            Inbound::RoomPresence(presence) => self.on_room_presence(presence),
            Inbound::Ignored => {}
        }
    }

    fn on_result(&mut self, id: &str, from: Option<String>, query: Option<Element>) {
        match (id, self.state) {
            (stanza::STARTUP_ID, SessionState::AwaitingProfile) => self.on_startup(query),
            (stanza::ROOMS_ID, SessionState::AwaitingRooms) => self.on_rooms(query),
            (stanza::USER_PROFILE_ID, _) => self.on_user_profile(from, query),
            _ => debug!(id, state = %self.state, "Ignoring unexpected result"),
        }
    }

    fn on_startup(&mut self, query: Option<Element>) {
        let profile = query
            .as_ref()
            .map(stanza::parse_own_profile)
            .unwrap_or_default();

        let nick = profile.nick.unwrap_or_else(|| {
            let fallback = self
                .identity
                .jid
                .split_once('@')
                .map_or(self.identity.jid.as_str(), |(node, _)| node)
                .to_string();
            warn!(nick = %fallback, "Profile carries no name, using account node as nick");
            fallback
        });
        self.mention_pattern = profile
            .mention_name
            .as_deref()
            .and_then(|mention| match mention_regex(mention) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    warn!(mention, error = %err, "Could not build mention pattern");
                    None
                }
            });
        info!(
            nick = %nick,
            mention_name = profile.mention_name.as_deref().unwrap_or("-"),
            "Own profile received"
        );
        self.identity.nick = Some(nick);
        self.identity.mention_name = profile.mention_name;

        self.transition(SessionState::AwaitingRooms);
        self.outbound
            .send(stanza::build_room_discovery(&self.settings.room_directory));
    }

    fn on_rooms(&mut self, query: Option<Element>) {
        let rooms = query
            .as_ref()
            .map(stanza::parse_room_items)
            .unwrap_or_default();
        self.rooms.replace(rooms);
        info!(count = self.rooms.len(), "Room directory received");

        self.transition(SessionState::Joining);

        let targets: Vec<String> = match &self.settings.join_rooms {
            Some(configured) => configured.clone(),
            None => self.rooms.jids().map(str::to_string).collect(),
        };
        let nick = self.identity.nick.clone().unwrap_or_default();
        for room in &targets {
            info!(room = %room, nick = %nick, "Joining room");
            self.outbound
                .send(stanza::build_room_join(room, &nick, &self.identity.full_jid));
        }

        self.joined = targets;
        self.transition(SessionState::Active);
    }

    fn on_user_profile(&mut self, from: Option<String>, query: Option<Element>) {
        let (Some(from), Some(query)) = (from, query) else {
            return;
        };
        let jid = stanza::bare_jid(&from);
        let mention_name = stanza::parse_mention_name(&query);
        if self.users.resolve_mention_name(&jid, mention_name) {
            debug!(jid = %jid, "User profile resolved");
        }
    }

    fn on_error(&mut self, kind: &str, id: Option<String>, condition: Option<String>) {
        warn!(
            stanza = kind,
            id = id.as_deref().unwrap_or("-"),
            condition = condition.as_deref().unwrap_or("-"),
            state = %self.state,
            "Server returned an error"
        );

        let pending = match self.state {
            SessionState::AwaitingProfile => stanza::STARTUP_ID,
            SessionState::AwaitingRooms => stanza::ROOMS_ID,
            _ => return,
        };
        if id.as_deref() == Some(pending) {
            error!(state = %self.state, request_id = pending, "Handshake stalled");
            self.stall = Some(Stall {
                state: self.state,
                request_id: pending.to_string(),
                condition,
            });
        }
    }

    fn on_room_presence(&mut self, presence: RoomPresence) {
        if presence.is_self {
            debug!(room = %presence.room, "Own room presence");
            return;
        }
        let Some(jid) = presence.jid else {
            debug!(room = %presence.room, nick = %presence.nick, "Presence without participant jid");
            return;
        };
        if self.identity.is_own_jid(&jid) {
            return;
        }

        debug!(
            room = %presence.room,
            jid = %jid,
            nick = %presence.nick,
            available = presence.available,
            "Room presence"
        );
        self.users.observe(&presence.room, &jid, &presence.nick);
        if !presence.available {
            self.users.leave(&presence.room, &presence.nick);
        }
        self.outbound.send(stanza::build_profile_lookup(&jid));
    }

    fn on_group_chat(&mut self, chat: GroupChat) {
        if self.state != SessionState::Active {
            debug!(room = %chat.room, state = %self.state, "Group message before session is active");
            return;
        }

        let sender = chat
            .nick
            .as_deref()
            .and_then(|nick| self.users.occupant_jid(&chat.room, nick))
            .map(str::to_string)
            .unwrap_or_else(|| match &chat.nick {
                Some(nick) => format!("{}/{nick}", chat.room),
                None => chat.room.clone(),
            });

        let message = InboundMessage {
            sender,
            nick: chat.nick,
            room: chat.room,
            body: chat.body.unwrap_or_default(),
            raw: chat.stanza,
        };

        let ctx = self.context();
        let outcome = dispatch::dispatch(
            &ctx,
            &self.registry,
            self.mention_pattern.as_ref(),
            &message,
        );
        if let DispatchOutcome::Completed {
            invoked, failed, ..
        } = outcome
        {
            if invoked > 0 {
                debug!(room = %message.room, invoked, failed, "Message dispatched");
            }
        }
    }
}

/// `@<mention>` as a whole word.
pub fn mention_regex(mention: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"@\b{}\b", regex::escape(mention)))
}
