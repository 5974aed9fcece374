//! Burst generation for a freshly-linked peer.
//!
//! After the handshake we advertise everything we know, in dependency
//! order: servers, users, channels (members, modes, topics), then the ban
//! table. The ban section runs once per peer (`bans_negotiated`); K-line
//! style forms need a user source, and when no suitable user survives we
//! introduce a per-link ephemeral "ban agent" that is quit again the
//! moment the bans are flushed. The agent never enters the pool and never
//! touches normal user registration.

use meshirc_proto::{Message, Sid, Uid};
use tracing::{debug, info};

use crate::bans::Ban;
use crate::engine::Engine;
use crate::event::{names, EventArgs};
use crate::state::User;
use crate::sync::encode::{self, EncodeOutcome};

/// Send the full state burst to `peer`.
pub fn send_burst(engine: &mut Engine, peer: Sid, now: i64) {
    let args = EventArgs::server(peer);
    engine.bus.fire(&mut engine.net, names::SERVER_SEND_BURST, &args);
    engine
        .bus
        .fire(&mut engine.net, names::SERVER_SEND_TS6_BURST, &args);

    let me = engine.net.me;
    let me_token = me.to_string();
    let mut frames: Vec<Message> = Vec::new();

    // Servers behind us (and behind other peers).
    for server in engine.net.servers() {
        if server.sid == me || server.sid == peer {
            continue;
        }
        frames.push(Message::new(
            Some(&me_token),
            "SID",
            [
                server.name.clone(),
                "2".to_string(),
                server.sid.to_string(),
                server.description.clone(),
            ],
        ));
    }

    // Users, except anything already behind the new peer.
    for user in engine.net.users() {
        if user.location == peer {
            continue;
        }
        frames.push(euid_frame(&user.server.to_string(), user));
    }

    // Channels: SJOIN with members and simple modes, then the topic.
    let peer_table = engine.net.perspective(peer).clone();
    let mut burst_channels = Vec::new();
    for chan in engine.net.channels() {
        if chan.users.is_empty() {
            continue;
        }
        burst_channels.push(chan.name.clone());
        let line = chan.mode_line(&peer_table);
        let tokens: Vec<String> = chan
            .users
            .iter()
            .map(|&uid| chan.burst_token(&peer_table, uid))
            .collect();
        let mut params = vec![chan.time.to_string(), chan.name.clone(), line.modes];
        params.extend(line.params);
        params.push(tokens.join(" "));
        frames.push(Message::new(Some(&me_token), "SJOIN", params));

        if let Some(topic) = &chan.topic {
            frames.push(Message::new(
                Some(&me_token),
                "TB",
                [
                    chan.name.clone(),
                    topic.set_at.to_string(),
                    topic.set_by.clone(),
                    topic.text.clone(),
                ],
            ));
        }
    }
    for frame in frames {
        engine.links.send(peer, frame);
    }
    for chan in burst_channels {
        engine
            .bus
            .fire(&mut engine.net, names::CHANNEL_BURST, &EventArgs::channel(&chan));
    }

    send_ban_burst(engine, peer, now);

    // End of burst; the peer answers with PONG.
    let name = engine.net.my_name();
    engine
        .links
        .send(peer, Message::new(Some(&me_token), "PING", [name]));
}

/// Advertise the ban table, once per peer.
fn send_ban_burst(engine: &mut Engine, peer: Sid, now: i64) {
    let negotiated = engine
        .net
        .server(peer)
        .map(|s| s.bans_negotiated)
        .unwrap_or(true);
    if negotiated {
        return;
    }

    let peer_has_ban = engine
        .net
        .server(peer)
        .is_some_and(|s| s.has_cap("BAN"));
    let bans: Vec<Ban> = engine
        .bans
        .iter()
        .filter(|b| b.is_retained(now))
        .cloned()
        .collect();

    let mut agent: Option<Uid> = None;
    let mut sent = 0usize;
    for ban in bans {
        // Expired bans are not advertised; deletions only make sense to
        // peers whose forms can carry them.
        if !ban.disabled && now >= ban.expires() {
            continue;
        }
        if ban.disabled && !peer_has_ban {
            continue;
        }

        let mut user_source = engine.user_source_for(&ban);
        let mut outcome = encode_for(engine, peer, &ban, user_source, now);
        if outcome == EncodeOutcome::NeedUserSource {
            let agent_uid = match agent {
                Some(uid) => uid,
                None => {
                    let uid = introduce_ban_agent(engine, peer, now);
                    agent = Some(uid);
                    uid
                }
            };
            user_source = Some(agent_uid);
            outcome = encode_for(engine, peer, &ban, user_source, now);
        }
        if let EncodeOutcome::Frames(frames) = outcome {
            for frame in frames {
                engine.links.send(peer, frame);
            }
            sent += 1;
        }
    }

    if let Some(agent_uid) = agent {
        engine.links.send(
            peer,
            Message::new(Some(&agent_uid.to_string()), "QUIT", ["Ban flush complete"]),
        );
    }
    if let Some(server) = engine.net.server_mut(peer) {
        server.bans_negotiated = true;
    }
    debug!(peer = %peer, sent, "ban burst complete");
}

fn encode_for(
    engine: &Engine,
    peer: Sid,
    ban: &Ban,
    user_source: Option<Uid>,
    now: i64,
) -> EncodeOutcome {
    match engine.net.server(peer) {
        Some(server) => encode::encode_ban(ban, server, engine.net.me, user_source, now),
        None => EncodeOutcome::Drop,
    }
}

/// Introduce the ephemeral ban agent to one peer. It is allocated a real
/// UID but deliberately never added to the pool.
fn introduce_ban_agent(engine: &mut Engine, peer: Sid, now: i64) -> Uid {
    let uid = engine.net.uid_alloc.allocate();
    let name = engine.net.my_name();
    info!(peer = %peer, %uid, "introducing ban agent for ban burst");
    let frame = Message::new(
        Some(&engine.net.me.to_string()),
        "EUID",
        [
            "ban-agent".to_string(),
            "1".to_string(),
            now.to_string(),
            "+io".to_string(),
            "bans".to_string(),
            name.clone(),
            "0".to_string(),
            uid.to_string(),
            name,
            "*".to_string(),
            "Ban propagation agent".to_string(),
        ],
    );
    engine.links.send(peer, frame);
    uid
}

/// EUID introduction for one user, from its origin server.
pub fn euid_frame(origin: &str, user: &User) -> Message {
    Message::new(
        Some(origin),
        "EUID",
        [
            user.nick.clone(),
            "1".to_string(),
            user.nick_time.to_string(),
            user_modes_string(user),
            user.ident.clone(),
            user.cloak.clone(),
            user.ip.clone(),
            user.uid.to_string(),
            user.host.clone(),
            user.account.clone().unwrap_or_else(|| "*".to_string()),
            user.real.clone(),
        ],
    )
}

fn user_modes_string(user: &User) -> String {
    let mut out = String::from("+");
    let mut letters: Vec<&str> = user.modes.iter().map(String::as_str).collect();
    letters.sort_unstable();
    for letter in letters {
        out.push_str(letter);
    }
    out
}
