//! End-to-end session behaviour against scripted server stanzas.

use std::sync::{Arc, Mutex};

use leonard::stanza::{NS_HIPCHAT_PROFILE, NS_HIPCHAT_STARTUP};
use leonard::{
    outbound_channel, parse_config, run, Config, EventSender, Gateway, HandlerKind,
    HandlerRegistry, Outbound, OutboundMessage, OutboundReceiver, Session, SessionError,
    SessionState, TransportError, TransportEvent,
};
use minidom::Element;
use tracing_test::traced_test;
use xmpp_parsers::ns;

const ACCOUNT: &str = r#"
[account]
jid = "1_1@chat.hipchat.com"
password = "secret"
"#;

fn config(extra: &str) -> Config {
    parse_config(&format!("{ACCOUNT}{extra}")).expect("valid test config")
}

fn xml(text: &str) -> TransportEvent {
    TransportEvent::Stanza(text.parse::<Element>().expect("valid XML"))
}

fn startup_result() -> TransportEvent {
    xml("<iq xmlns='jabber:client' type='result' id='startup'>\
           <query xmlns='http://hipchat.com/protocol/startup'>\
             <name>Bender</name><mention_name>bender</mention_name>\
           </query>\
         </iq>")
}

fn rooms_result() -> TransportEvent {
    xml("<iq xmlns='jabber:client' type='result' id='rooms' from='conf.hipchat.com'>\
           <query xmlns='http://jabber.org/protocol/disco#items'>\
             <item jid='a@conf' name='Alpha'><x xmlns='http://hipchat.com/protocol/muc#room'><id>1</id></x></item>\
             <item jid='b@conf' name='Beta'><x xmlns='http://hipchat.com/protocol/muc#room'><id>2</id></x></item>\
           </query>\
         </iq>")
}

fn presence(room: &str, nick: &str, jid: &str) -> TransportEvent {
    xml(&format!(
        "<presence xmlns='jabber:client' from='{room}/{nick}'>\
           <x xmlns='http://jabber.org/protocol/muc#user'>\
             <item jid='{jid}' affiliation='member' role='participant'/>\
           </x>\
         </presence>"
    ))
}

fn profile_result(jid: &str, mention: &str) -> TransportEvent {
    xml(&format!(
        "<iq xmlns='jabber:client' type='result' id='userprofile' from='{jid}'>\
           <query xmlns='http://hipchat.com/protocol/profile'>\
             <mention_name>{mention}</mention_name>\
           </query>\
         </iq>"
    ))
}

fn groupchat(room: &str, nick: &str, body: &str) -> TransportEvent {
    xml(&format!(
        "<message xmlns='jabber:client' type='groupchat' from='{room}/{nick}'>\
           <body>{body}</body>\
         </message>"
    ))
}

fn drain(rx: &mut OutboundReceiver) -> Vec<Element> {
    let mut stanzas = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let Outbound::Stanza(elem) = frame {
            stanzas.push(elem);
        }
    }
    stanzas
}

fn joins(stanzas: &[Element]) -> Vec<String> {
    stanzas
        .iter()
        .filter(|s| s.name() == "presence" && s.get_child("x", ns::MUC).is_some())
        .filter_map(|s| s.attr("to").map(str::to_string))
        .collect()
}

/// Session driven through startup and room discovery.
fn active_session(config: &Config, registry: HandlerRegistry) -> (Session, OutboundReceiver) {
    let (outbound, mut rx) = outbound_channel();
    let mut session = Session::new(config, registry, outbound);
    session.handle_event(TransportEvent::Connected).unwrap();
    session.handle_event(startup_result()).unwrap();
    session.handle_event(rooms_result()).unwrap();
    assert_eq!(session.state(), SessionState::Active);
    drain(&mut rx);
    (session, rx)
}

#[tokio::test(flavor = "current_thread")]
async fn handshake_announces_presence_then_discovers_profile() {
    let (outbound, mut rx) = outbound_channel();
    let mut session = Session::new(&config(""), HandlerRegistry::new(), outbound);

    session.handle_event(TransportEvent::Connected).unwrap();

    let sent = drain(&mut rx);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].name(), "presence");
    assert_eq!(sent[0].attr("type"), Some("available"));
    assert_eq!(sent[1].attr("id"), Some("startup"));
    assert!(sent[1].get_child("query", NS_HIPCHAT_STARTUP).is_some());
    assert_eq!(session.state(), SessionState::AwaitingProfile);
}

#[tokio::test(flavor = "current_thread")]
async fn joins_every_discovered_room_without_join_list() {
    let (outbound, mut rx) = outbound_channel();
    let mut session = Session::new(&config(""), HandlerRegistry::new(), outbound);

    session.handle_event(TransportEvent::Connected).unwrap();
    session.handle_event(startup_result()).unwrap();
    assert_eq!(session.state(), SessionState::AwaitingRooms);
    assert_eq!(session.identity().nick.as_deref(), Some("Bender"));
    assert_eq!(session.identity().mention_name.as_deref(), Some("bender"));

    session.handle_event(rooms_result()).unwrap();

    let sent = drain(&mut rx);
    let discovery = sent
        .iter()
        .find(|s| s.attr("id") == Some("rooms"))
        .expect("room discovery sent");
    assert_eq!(discovery.attr("to"), Some("conf.hipchat.com"));
    assert_eq!(joins(&sent), vec!["a@conf/Bender", "b@conf/Bender"]);
    assert_eq!(session.rooms().len(), 2);
    assert_eq!(
        session.transitions(),
        &[
            SessionState::Disconnected,
            SessionState::Negotiating,
            SessionState::AwaitingProfile,
            SessionState::AwaitingRooms,
            SessionState::Joining,
            SessionState::Active,
        ]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn joins_only_configured_rooms() {
    let config = config("\n[session]\njoin_rooms = [\"b@conf\"]\n");
    let (outbound, mut rx) = outbound_channel();
    let mut session = Session::new(&config, HandlerRegistry::new(), outbound);

    session.handle_event(TransportEvent::Connected).unwrap();
    session.handle_event(startup_result()).unwrap();
    session.handle_event(rooms_result()).unwrap();

    assert_eq!(joins(&drain(&mut rx)), vec!["b@conf/Bender"]);
}

#[tokio::test(flavor = "current_thread")]
async fn out_of_order_results_do_not_advance_state() {
    let (outbound, _rx) = outbound_channel();
    let mut session = Session::new(&config(""), HandlerRegistry::new(), outbound);
    session.handle_event(TransportEvent::Connected).unwrap();

    session.handle_event(rooms_result()).unwrap();
    assert_eq!(session.state(), SessionState::AwaitingProfile);
    assert!(session.rooms().is_empty());

    session
        .handle_event(xml("<iq xmlns='jabber:client' type='result' id='unrelated'/>"))
        .unwrap();
    assert_eq!(session.state(), SessionState::AwaitingProfile);

    session.handle_event(startup_result()).unwrap();
    session.handle_event(startup_result()).unwrap();
    assert_eq!(session.state(), SessionState::AwaitingRooms);
}

#[tokio::test(flavor = "current_thread")]
#[traced_test]
async fn server_error_stalls_pending_step() {
    let (outbound, _rx) = outbound_channel();
    let mut session = Session::new(&config(""), HandlerRegistry::new(), outbound);
    session.handle_event(TransportEvent::Connected).unwrap();
    session.handle_event(startup_result()).unwrap();

    session
        .handle_event(xml(
            "<iq xmlns='jabber:client' type='error' id='rooms'>\
               <error type='cancel'><service-unavailable xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error>\
             </iq>",
        ))
        .unwrap();

    assert_eq!(session.state(), SessionState::AwaitingRooms);
    let stall = session.stall().expect("stall recorded");
    assert_eq!(stall.state, SessionState::AwaitingRooms);
    assert_eq!(stall.request_id, "rooms");
    assert_eq!(stall.condition.as_deref(), Some("service-unavailable"));
    assert!(logs_contain("Handshake stalled"));
}

#[tokio::test(flavor = "current_thread")]
async fn presence_tracks_user_and_requests_profile() {
    let (mut session, mut rx) = active_session(&config(""), HandlerRegistry::new());

    session
        .handle_event(presence("a@conf", "Philip Fry", "1_7@chat.hipchat.com/web"))
        .unwrap();

    let sent = drain(&mut rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].attr("id"), Some("userprofile"));
    assert_eq!(sent[0].attr("to"), Some("1_7@chat.hipchat.com"));
    assert!(sent[0].get_child("query", NS_HIPCHAT_PROFILE).is_some());

    session
        .handle_event(profile_result("1_7@chat.hipchat.com", "fry"))
        .unwrap();
    let user = session.users().get("1_7@chat.hipchat.com").unwrap();
    assert_eq!(user.display_name, "Philip Fry");
    assert_eq!(user.mention_name.as_deref(), Some("fry"));
}

#[tokio::test(flavor = "current_thread")]
async fn own_presence_is_not_tracked() {
    let (mut session, mut rx) = active_session(&config(""), HandlerRegistry::new());

    session
        .handle_event(xml(
            "<presence xmlns='jabber:client' from='a@conf/Bender'>\
               <x xmlns='http://jabber.org/protocol/muc#user'>\
                 <item jid='1_1@chat.hipchat.com/bot'/><status code='110'/>\
               </x>\
             </presence>",
        ))
        .unwrap();

    assert!(session.users().is_empty());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn profile_for_unknown_user_is_ignored() {
    let (mut session, _rx) = active_session(&config(""), HandlerRegistry::new());
    session
        .handle_event(profile_result("ghost@chat.hipchat.com", "ghost"))
        .unwrap();
    assert!(session.users().is_empty());
}

type Seen = Arc<Mutex<Vec<(String, String, String)>>>;

fn recording_registry(seen: &Seen) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for (kind, label) in [(HandlerKind::Message, "message"), (HandlerKind::Mention, "mention")] {
        let seen = seen.clone();
        registry
            .register(
                kind,
                ".*",
                "",
                move |_, msg, _| {
                    seen.lock()
                        .unwrap()
                        .push((label.to_string(), msg.sender.clone(), msg.body.clone()));
                    Ok(())
                },
                None,
            )
            .unwrap();
    }
    registry
}

#[tokio::test(flavor = "current_thread")]
async fn whitespace_body_is_dispatched() {
    let seen = Seen::default();
    let (mut session, _rx) = active_session(&config(""), recording_registry(&seen));

    let message = Element::builder("message", ns::JABBER_CLIENT)
        .attr("type", "groupchat")
        .attr("from", "a@conf/Fry")
        .append(Element::builder("body", ns::JABBER_CLIENT).append("   ").build())
        .build();
    session.handle_event(TransportEvent::Stanza(message)).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "message");
    assert_eq!(seen[0].2, "   ");
}

#[tokio::test(flavor = "current_thread")]
async fn shared_nick_resolves_to_room_occupant() {
    let seen = Seen::default();
    let (mut session, _rx) = active_session(&config(""), recording_registry(&seen));
    session
        .handle_event(presence("a@conf", "Fry", "1_7@chat.hipchat.com"))
        .unwrap();
    session
        .handle_event(presence("b@conf", "Fry", "1_8@chat.hipchat.com"))
        .unwrap();

    session.handle_event(groupchat("b@conf", "Fry", "hi")).unwrap();
    session.handle_event(groupchat("a@conf", "Fry", "hey")).unwrap();

    let senders: Vec<_> = seen.lock().unwrap().iter().map(|(_, s, _)| s.clone()).collect();
    assert_eq!(senders, vec!["1_8@chat.hipchat.com", "1_7@chat.hipchat.com"]);
}

#[tokio::test(flavor = "current_thread")]
async fn departed_occupant_falls_back_to_room_address() {
    let seen = Seen::default();
    let (mut session, _rx) = active_session(&config(""), recording_registry(&seen));
    session
        .handle_event(presence("a@conf", "Fry", "1_7@chat.hipchat.com"))
        .unwrap();
    session
        .handle_event(xml(
            "<presence xmlns='jabber:client' type='unavailable' from='a@conf/Fry'>\
               <x xmlns='http://jabber.org/protocol/muc#user'><item jid='1_7@chat.hipchat.com'/></x>\
             </presence>",
        ))
        .unwrap();

    session.handle_event(groupchat("a@conf", "Fry", "hi")).unwrap();

    assert_eq!(seen.lock().unwrap()[0].1, "a@conf/Fry");
    assert!(session.users().get("1_7@chat.hipchat.com").is_some());
}

#[tokio::test(flavor = "current_thread")]
async fn mention_handlers_receive_full_body() {
    let seen = Seen::default();
    let (mut session, _rx) = active_session(&config(""), recording_registry(&seen));
    session
        .handle_event(presence("a@conf", "Philip Fry", "1_7@chat.hipchat.com"))
        .unwrap();

    session
        .handle_event(groupchat("a@conf", "Philip Fry", "@bender status"))
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (
                "message".to_string(),
                "1_7@chat.hipchat.com".to_string(),
                "@bender status".to_string()
            ),
            (
                "mention".to_string(),
                "1_7@chat.hipchat.com".to_string(),
                "@bender status".to_string()
            ),
        ]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn own_and_empty_messages_are_not_dispatched() {
    let seen = Seen::default();
    let (mut session, _rx) = active_session(&config(""), recording_registry(&seen));

    session
        .handle_event(groupchat("a@conf", "Bender", "@bender echo"))
        .unwrap();
    session
        .handle_event(xml(
            "<message xmlns='jabber:client' type='groupchat' from='a@conf/Fry'><subject>x</subject></message>",
        ))
        .unwrap();

    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn mentions_before_profile_resolution_do_not_match() {
    let seen = Seen::default();
    let (outbound, _rx) = outbound_channel();
    let mut session = Session::new(&config(""), recording_registry(&seen), outbound);
    session.handle_event(TransportEvent::Connected).unwrap();

    session
        .handle_event(groupchat("a@conf", "Fry", "@bender status"))
        .unwrap();
    assert!(session.mention_pattern().is_none());
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "current_thread")]
#[traced_test]
async fn failing_handler_does_not_block_later_events() {
    let seen = Seen::default();
    let mut registry = HandlerRegistry::new();
    registry
        .plugin("flaky")
        .on_message("status", |_, _, _| anyhow::bail!("backend down"))
        .unwrap();
    registry.extend(recording_registry(&seen));
    let (mut session, _rx) = active_session(&config(""), registry);

    session
        .handle_event(groupchat("a@conf", "Fry", "status"))
        .unwrap();
    session
        .handle_event(groupchat("a@conf", "Fry", "status again"))
        .unwrap();

    assert_eq!(seen.lock().unwrap().len(), 2);
    assert!(logs_contain("backend down"));
    assert!(logs_contain("flaky"));
}

#[tokio::test(flavor = "current_thread")]
async fn handlers_reply_through_context() {
    let mut registry = HandlerRegistry::new();
    registry
        .plugin("ping")
        .on_mention(r"\bping\b", |ctx, msg, _| {
            ctx.reply(msg, "pong");
            Ok(())
        })
        .unwrap();
    let (mut session, mut rx) = active_session(&config(""), registry);
    session
        .handle_event(presence("a@conf", "Philip Fry", "1_7@chat.hipchat.com"))
        .unwrap();
    session
        .handle_event(profile_result("1_7@chat.hipchat.com", "fry"))
        .unwrap();
    drain(&mut rx);

    session
        .handle_event(groupchat("a@conf", "Philip Fry", "@bender ping"))
        .unwrap();

    let sent = drain(&mut rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].attr("to"), Some("a@conf"));
    assert_eq!(sent[0].attr("from"), Some("1_1@chat.hipchat.com/bot"));
    let body = sent[0].get_child("body", ns::JABBER_CLIENT).unwrap();
    assert_eq!(body.text(), "@fry pong");
}

#[tokio::test(flavor = "current_thread")]
async fn late_registrations_and_direct_sends() {
    let (mut session, mut rx) = active_session(&config(""), HandlerRegistry::new());
    let hits = Arc::new(Mutex::new(0));
    let counter = hits.clone();
    session
        .on_message("^hello", move |_, _, _| {
            *counter.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();

    session
        .handle_event(groupchat("b@conf", "Fry", "hello there"))
        .unwrap();
    session.send_message(OutboundMessage::new("b@conf", "announcement"));

    assert_eq!(*hits.lock().unwrap(), 1);
    let sent = drain(&mut rx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].attr("type"), Some("groupchat"));
}

#[tokio::test(flavor = "current_thread")]
async fn transport_error_is_fatal() {
    let (outbound, _rx) = outbound_channel();
    let mut session = Session::new(&config(""), HandlerRegistry::new(), outbound);
    session.handle_event(TransportEvent::Connected).unwrap();

    let error = session
        .handle_event(TransportEvent::Error {
            reason: "tls failure".to_string(),
        })
        .unwrap_err();
    assert!(matches!(error, SessionError::TransportLost(_)));
    assert_eq!(session.state(), SessionState::Disconnected);
}

/// Replays a fixed script of events, recording what the session sends.
struct ScriptedGateway {
    script: Vec<TransportEvent>,
    sent: Arc<Mutex<Vec<Outbound>>>,
}

impl Gateway for ScriptedGateway {
    async fn run(
        self,
        mut outbound: OutboundReceiver,
        events: EventSender,
    ) -> Result<(), TransportError> {
        for event in self.script {
            events
                .send(event)
                .map_err(|e| TransportError::Closed(e.to_string()))?;
            tokio::task::yield_now().await;
            while let Ok(frame) = outbound.try_recv() {
                self.sent.lock().unwrap().push(frame);
            }
        }
        Ok(())
    }
}

#[tokio::test(flavor = "current_thread")]
async fn run_drives_session_until_disconnect() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let gateway = ScriptedGateway {
        script: vec![
            TransportEvent::Connected,
            startup_result(),
            rooms_result(),
            TransportEvent::Disconnected {
                reason: "server shutdown".to_string(),
            },
        ],
        sent: sent.clone(),
    };

    let result = run(gateway, config(""), HandlerRegistry::new()).await;

    assert!(matches!(result, Err(SessionError::TransportLost(ref r)) if r == "server shutdown"));
    let stanzas: Vec<Element> = sent
        .lock()
        .unwrap()
        .drain(..)
        .filter_map(|frame| match frame {
            Outbound::Stanza(elem) => Some(elem),
            Outbound::Raw(_) => None,
        })
        .collect();
    assert_eq!(stanzas[0].name(), "presence");
    assert_eq!(stanzas[0].attr("type"), Some("available"));
    let queries: Vec<_> = stanzas
        .iter()
        .filter(|s| s.name() == "iq")
        .filter_map(|s| s.attr("id"))
        .collect();
    assert_eq!(queries, vec!["startup", "rooms"]);
    assert_eq!(joins(&stanzas), vec!["a@conf/Bender", "b@conf/Bender"]);
}

#[tokio::test(flavor = "current_thread")]
async fn run_reports_gateway_ending_silently() {
    let gateway = ScriptedGateway {
        script: vec![TransportEvent::Connected],
        sent: Arc::new(Mutex::new(Vec::new())),
    };

    let result = run(gateway, config(""), HandlerRegistry::new()).await;

    assert!(matches!(result, Err(SessionError::EventStreamClosed)));
}
