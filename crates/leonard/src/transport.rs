use std::future::Future;

use minidom::Element;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Events a gateway reports to the session, in arrival order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    Error { reason: String },
    Stanza(Element),
}

/// A frame queued for the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Stanza(Element),
    /// Written verbatim on the socket, outside stanza framing.
    Raw(String),
}

pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Fire-and-forget handle onto the gateway's write side.
///
/// Sends never block and never report delivery; a closed gateway drops frames.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl OutboundSender {
    pub fn send(&self, stanza: Element) {
        self.push(Outbound::Stanza(stanza));
    }

    pub fn send_raw(&self, data: impl Into<String>) {
        self.push(Outbound::Raw(data.into()));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&self, frame: Outbound) {
        if self.tx.send(frame).is_err() {
            tracing::debug!("gateway write side closed, dropping outbound frame");
        }
    }
}

pub fn outbound_channel() -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutboundSender { tx }, rx)
}

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// A chat-protocol client the session can drive.
///
/// `run` establishes the connection, reports `Connected` once the stream is
/// bound, forwards every inbound stanza as `TransportEvent::Stanza`, and writes
/// every `Outbound` frame it receives. It returns when the connection ends.
pub trait Gateway: Send + 'static {
    fn run(
        self,
        outbound: OutboundReceiver,
        events: EventSender,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
