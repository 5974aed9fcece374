//! Shared fixtures for the integration tests: an engine with a fake peer
//! link whose outbound queue the tests inspect directly.

use meshirc_proto::{Message, Sid, Uid};
use meshircd::state::User;
use meshircd::sync::handshake::PeerIdentity;
use meshircd::Engine;
use tokio::sync::mpsc::UnboundedReceiver;

/// An engine for `hub.test` (SID 009) with no peers.
pub fn engine() -> Engine {
    let config = toml::from_str(
        r#"
        [server]
        name = "hub.test"
        sid = "009"
        description = "Test hub"
        "#,
    )
    .unwrap();
    Engine::new(config).unwrap()
}

/// Register a peer as if its handshake just completed; returns the queue
/// of frames we send it (starting with our burst).
pub fn link_peer(
    engine: &mut Engine,
    sid: Sid,
    name: &str,
    caps: &[&str],
    now: i64,
) -> UnboundedReceiver<Message> {
    let identity = PeerIdentity {
        sid,
        name: name.to_string(),
        description: String::new(),
        caps: caps.iter().map(|c| c.to_string()).collect(),
    };
    engine.register_peer(identity, now).expect("register peer")
}

/// Drain every queued frame as strings.
pub fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<String> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|m| m.to_string())
        .collect()
}

/// Add a user attached to this server.
pub fn local_user(engine: &mut Engine, uid: &str, nick: &str) -> Uid {
    let me = engine.net.me;
    let uid = Uid::from_ts6(uid).unwrap();
    assert_eq!(uid.sid, me, "local test users must carry our SID");
    engine.net.add_user(User {
        uid,
        nick: nick.to_string(),
        ident: nick.to_string(),
        host: "users.test".to_string(),
        cloak: "users.test".to_string(),
        ip: "192.0.2.10".to_string(),
        real: nick.to_string(),
        nick_time: 100,
        account: None,
        modes: Default::default(),
        server: me,
        location: me,
        channels: Vec::new(),
    });
    uid
}
