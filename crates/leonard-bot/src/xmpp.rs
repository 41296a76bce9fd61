//! tokio-xmpp backed gateway.
//!
//! Uses `tokio-xmpp::AsyncClient` directly so the session sees raw stanzas,
//! HipChat payloads included, and so keepalive whitespace can be written
//! outside stanza framing.

use std::str::FromStr;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use leonard::config::AccountConfig;
use leonard::{EventSender, Gateway, Outbound, OutboundReceiver, TransportError, TransportEvent};
use tokio_xmpp::starttls::ServerConfig;
use tokio_xmpp::{AsyncClient, Event as TokioXmppEvent, Packet};
use tracing::{debug, info, warn};
use xmpp_parsers::jid::Jid;

pub struct XmppGateway {
    client: AsyncClient<ServerConfig>,
}

impl XmppGateway {
    pub fn new(account: &AccountConfig) -> Result<Self> {
        let full_jid = account.full_jid();
        let jid = Jid::from_str(&full_jid).with_context(|| format!("Invalid JID: {full_jid}"))?;

        let host = account.host();
        info!("Creating XMPP client for {} via {}:{}", jid, host, account.port);

        let client_config = tokio_xmpp::AsyncConfig {
            jid,
            password: account.password.clone(),
            server: ServerConfig::Manual {
                host,
                port: account.port,
            },
        };

        let mut client = AsyncClient::new_with_config(client_config);
        // Transport loss ends the session; restarting is up to the process supervisor.
        client.set_reconnect(false);

        Ok(Self { client })
    }
}

fn forward(events: &EventSender, event: TransportEvent) -> Result<(), TransportError> {
    events
        .send(event)
        .map_err(|_| TransportError::Closed("session stopped receiving events".to_string()))
}

impl Gateway for XmppGateway {
    async fn run(
        mut self,
        mut outbound: OutboundReceiver,
        events: EventSender,
    ) -> Result<(), TransportError> {
        let mut online = false;
        loop {
            tokio::select! {
                event = self.client.next() => match event {
                    Some(TokioXmppEvent::Online { bound_jid, .. }) => {
                        info!("XMPP connected as {bound_jid}");
                        online = true;
                        forward(&events, TransportEvent::Connected)?;
                    }
                    Some(TokioXmppEvent::Disconnected(err)) => {
                        warn!("XMPP disconnected: {err}");
                        let reason = err.to_string();
                        forward(&events, TransportEvent::Disconnected {
                            reason: reason.clone(),
                        })?;
                        if !online {
                            return Err(TransportError::ConnectFailed(reason));
                        }
                        return Ok(());
                    }
                    Some(TokioXmppEvent::Stanza(elem)) => {
                        forward(&events, TransportEvent::Stanza(elem))?;
                    }
                    None => {
                        forward(&events, TransportEvent::Disconnected {
                            reason: "stream ended".to_string(),
                        })?;
                        return Ok(());
                    }
                },
                frame = outbound.recv() => match frame {
                    Some(Outbound::Stanza(elem)) => {
                        if let Err(e) = self.client.send_stanza(elem).await {
                            warn!("Failed to send stanza: {e}");
                        }
                    }
                    Some(Outbound::Raw(data)) => {
                        debug!(bytes = data.len(), "Writing raw data");
                        if let Err(e) = SinkExt::send(&mut self.client, Packet::Text(data)).await {
                            warn!("Failed to write raw data: {e}");
                        }
                    }
                    None => {
                        info!("Disconnecting XMPP client");
                        let _ = self.client.send_end().await;
                        return Ok(());
                    }
                },
            }
        }
    }
}
