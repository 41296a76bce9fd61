//! Leonard: a group-chat bot engine for HipChat-flavoured XMPP.
//!
//! The crate owns the session handshake, tracks rooms and users, and routes
//! chat text to pattern-matched handlers. Connecting to a server is left to a
//! [`Gateway`] implementation.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod keepalive;
pub mod message;
pub mod registry;
pub mod rooms;
pub mod session;
pub mod stanza;
pub mod transport;

pub use config::{load_config_from, load_config_from_str, parse_config, Config};
pub use error::{ConfigError, RegistryError, SessionError, TransportError};
pub use identity::{IdentityTracker, SelfIdentity, User};
pub use message::{BotContext, InboundMessage, OutboundMessage};
pub use registry::{HandlerKind, HandlerRegistry};
pub use rooms::{RoomDirectory, RoomInfo};
pub use session::{Session, SessionState, Stall};
pub use transport::{
    event_channel, outbound_channel, EventSender, Gateway, Outbound, OutboundReceiver,
    OutboundSender, TransportEvent,
};

use tracing::{info, warn};

/// Drive a session over `gateway` until the connection ends.
///
/// Always returns an error: a bot session only stops when its transport does.
pub async fn run<G: Gateway>(
    gateway: G,
    config: Config,
    registry: HandlerRegistry,
) -> Result<(), SessionError> {
    let (outbound, outbound_rx) = outbound_channel();
    let (events_tx, mut events) = event_channel();

    let mut session = Session::new(&config, registry, outbound);
    let io = tokio::spawn(gateway.run(outbound_rx, events_tx));
    info!(jid = %config.account.full_jid(), "Session started");

    while let Some(event) = events.recv().await {
        if let Err(err) = session.handle_event(event) {
            io.abort();
            return Err(err);
        }
    }

    // Gateway dropped its event sender without reporting a disconnect.
    let result = match io.await {
        Ok(Ok(())) => Err(SessionError::EventStreamClosed),
        Ok(Err(err)) => Err(SessionError::Transport(err)),
        Err(join_err) => Err(SessionError::TransportLost(join_err.to_string())),
    };
    warn!(state = %session.state(), "Gateway finished");
    result
}
