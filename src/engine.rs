//! The engine: one value owning the pool, event bus, ban table, mode
//! blocks, and peer links.
//!
//! Every top-level entry point (inbound frames, local commands, timer
//! ticks) takes `&mut Engine` on the single scheduler thread. A frame's
//! side effects, including all outbound fan-out, are queued before the
//! next frame is examined.

use meshirc_proto::{Message, ModeChange, Sid, Uid};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bans::{Ban, BanEngine, BanKind};
use crate::config::{Config, ConfigError};
use crate::error::HandlerError;
use crate::event::{names as event_names, EventBus};
use crate::replies;
use crate::state::apply::{apply_modes, ModeBlocks};
use crate::state::{destroy_maybe, names_lines, Actor, Network, Server};
use crate::sync::handshake::PeerIdentity;
use crate::sync::{burst, decode, encode, Link, Links};

/// Process state and subsystems, threaded explicitly through every
/// handler.
pub struct Engine {
    pub config: Config,
    pub net: Network,
    pub bus: EventBus,
    pub bans: BanEngine,
    pub blocks: ModeBlocks,
    pub links: Links,
}

impl Engine {
    /// Build an engine from configuration.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let sid = config.server.sid()?;
        let mut net = Network::new(sid, config.server.name.clone());
        if let Some(me) = net.server_mut(sid) {
            me.description = config.server.description.clone();
        }
        Ok(Self {
            net,
            bus: EventBus::new(),
            bans: BanEngine::new(),
            blocks: ModeBlocks::standard(),
            links: Links::new(),
            config,
        })
    }

    /// Wall-clock seconds.
    pub fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    // --- link lifecycle ---------------------------------------------------

    /// Register a peer that completed its handshake: create its server
    /// record and link, send it our burst, and hand back the queue the
    /// transport writer drains. Refused (None) on SID collision.
    pub fn register_peer(
        &mut self,
        peer: PeerIdentity,
        now: i64,
    ) -> Option<mpsc::UnboundedReceiver<Message>> {
        if self.net.server(peer.sid).is_some() {
            warn!(sid = %peer.sid, name = %peer.name, "refusing link: SID already in use");
            return None;
        }
        let mut server = Server::new(peer.sid, &peer.name, &peer.description, Some(peer.sid));
        server.caps = peer.caps;
        server.is_burst = true;
        self.net.add_server(server);

        let (link, rx) = Link::open(peer.sid, &peer.name);
        self.links.insert(link);
        info!(sid = %peer.sid, name = %peer.name, "peer registered; sending burst");

        burst::send_burst(self, peer.sid, now);
        if let Some(link) = self.links.get_mut(peer.sid) {
            link.burst_sent = true;
        }
        Some(rx)
    }

    /// Tear down a link: optionally send a final ERROR, drop the queue,
    /// cascade the server removal, and tell the rest of the mesh.
    pub fn drop_link(&mut self, sid: Sid, reason: Option<&str>) {
        let Some(link) = self.links.remove(sid) else {
            return;
        };
        let reason = reason.unwrap_or("link closed");
        link.send(Message::new(None, "ERROR", [reason]));
        info!(peer = %link.name, reason = %reason, "dropping link");

        let touched = self.net.remove_server(sid);
        for chan in touched {
            destroy_maybe(&mut self.net, &self.bus, &chan);
        }
        let squit = Message::new(
            Some(&self.net.me.to_string()),
            "SQUIT",
            [sid.to_string(), reason.to_string()],
        );
        self.links.broadcast(None, &squit);
    }

    // --- inbound frames ---------------------------------------------------

    /// Handle one line from an established peer, applying the frame-local
    /// error policy.
    pub fn handle_line(&mut self, from: Sid, line: &str, now: i64) {
        let msg: Message = match line.parse() {
            Ok(msg) => msg,
            Err(err) => {
                self.protocol_notice(from, "frame.parse", &err.to_string());
                return;
            }
        };
        match decode::dispatch(self, from, &msg, now) {
            Ok(()) => {}
            Err(HandlerError::Protocol { kind, detail }) => {
                self.protocol_notice(from, kind, &detail);
            }
            Err(HandlerError::Disconnect { reason }) => {
                self.drop_link(from, Some(&reason));
            }
        }
    }

    /// Operator notice for a protocol violation, at most once per
    /// (peer, kind).
    pub fn protocol_notice(&mut self, from: Sid, kind: &'static str, detail: &str) {
        let first = self
            .net
            .server_mut(from)
            .map(|s| s.notice_once(kind))
            .unwrap_or(true);
        if first {
            warn!(peer = %from, kind, detail, "protocol violation from peer; frame dropped");
        } else {
            debug!(peer = %from, kind, detail, "repeated protocol violation; frame dropped");
        }
    }

    /// Re-propagate a frame to every bursted peer except its source.
    pub fn forward(&self, except: Sid, msg: &Message) {
        self.links.broadcast(Some(except), msg);
    }

    // --- bans -------------------------------------------------------------

    /// Upsert a ban, then enforce it locally and fan it out (skipping
    /// `from`, the peer it came from, if any).
    pub fn add_ban(&mut self, ban: Ban, from: Option<Sid>, now: i64) {
        let id = ban.id.clone();
        if self.bans.create_or_update(ban) {
            self.enforce_ban(&id, now);
            self.propagate_ban(&id, from, now);
        }
    }

    /// Delete a ban identified by user-entered text (mask form). Returns
    /// whether anything matched.
    pub fn delete_ban_by_input(
        &mut self,
        kind: BanKind,
        text: &str,
        source: Option<Actor>,
        from: Option<Sid>,
        now: i64,
    ) -> bool {
        let Some(id) = self.bans.by_user_input(kind, text).map(|b| b.id.clone()) else {
            debug!(?kind, text, "delete for unknown ban ignored");
            return false;
        };
        if let Some(ban) = self.bans.get_mut(&id) {
            ban.disable(now, source);
        }
        self.propagate_ban(&id, from, now);
        true
    }

    /// Disconnect every locally-attached user an active K-/D-line matches.
    pub fn enforce_ban(&mut self, id: &str, now: i64) {
        let Some(ban) = self.bans.get(id) else {
            return;
        };
        if !matches!(ban.kind, BanKind::Kline | BanKind::Dline) || !ban.is_active(now) {
            return;
        }
        let label = match ban.kind {
            BanKind::Kline => "K-lined",
            BanKind::Dline => "D-lined",
            _ => unreachable!(),
        };
        let reason = format!("{}: {}", label, ban.reason);
        let me = self.net.me;
        let victims: Vec<Uid> = self
            .net
            .users()
            .filter(|u| u.is_local(me) && ban.matches(u))
            .map(|u| u.uid)
            .collect();
        for uid in victims {
            info!(%uid, reason = %reason, "disconnecting banned user");
            self.disconnect_user(uid, &reason);
        }
    }

    /// Remove a local user everywhere: QUIT to the mesh, a close request
    /// to the client layer, and pool/channel cleanup.
    pub fn disconnect_user(&mut self, uid: Uid, reason: &str) {
        let quit = Message::new(Some(&uid.to_string()), "QUIT", [reason]);
        self.links.broadcast(None, &quit);
        self.net.client_disconnects.push((uid, reason.to_string()));
        let touched = self.net.remove_user(uid);
        for chan in touched {
            destroy_maybe(&mut self.net, &self.bus, &chan);
        }
    }

    /// Fan a ban out to every bursted peer except `except`, choosing the
    /// wire form each peer's capabilities support.
    pub fn propagate_ban(&mut self, id: &str, except: Option<Sid>, now: i64) {
        let Some(ban) = self.bans.get(id).cloned() else {
            return;
        };
        let user_source = self.user_source_for(&ban);
        let peers: Vec<Sid> = self
            .links
            .iter()
            .filter(|l| l.burst_sent && Some(l.sid) != except)
            .map(|l| l.sid)
            .collect();
        for sid in peers {
            let Some(server) = self.net.server(sid) else {
                continue;
            };
            match encode::encode_ban(&ban, server, self.net.me, user_source, now) {
                encode::EncodeOutcome::Frames(frames) => {
                    for frame in frames {
                        self.links.send(sid, frame);
                    }
                }
                encode::EncodeOutcome::NeedUserSource => {
                    warn!(
                        peer = %sid,
                        mask = %ban.mask,
                        "no user source to attribute ban to; dropping outbound"
                    );
                }
                encode::EncodeOutcome::Drop => {}
            }
        }
    }

    /// The user this ban can be attributed to on the wire, if still around.
    pub fn user_source_for(&self, ban: &Ban) -> Option<Uid> {
        match ban.recent_source {
            Some(Actor::User(uid)) if self.net.user(uid).is_some() => Some(uid),
            _ => None,
        }
    }

    // --- local entry points ----------------------------------------------

    /// Apply a locally-requested mode change (`force=false`), then
    /// broadcast the committed diff as TMODE per peer perspective.
    pub fn local_mode(
        &mut self,
        source: Uid,
        channel: &str,
        mode_str: &str,
        params: &[&str],
        now: i64,
    ) -> Vec<ModeChange> {
        let (changes, unknown) = self.net.table().changes_from_string(mode_str, params);
        for letter in unknown {
            debug!(%letter, channel, "dropping unknown mode letter");
        }
        let requests = requests_from_changes(&changes);
        let log = apply_modes(
            &mut self.net,
            &self.blocks,
            &self.config.limits,
            channel,
            Actor::User(source),
            &requests,
            false,
            false,
            now,
        );
        if !log.is_empty() {
            self.broadcast_tmode(channel, &log, Actor::User(source));
        }
        log
    }

    /// Send a committed diff to every bursted peer as `TMODE`, rendered
    /// under each peer's own mode perspective.
    pub fn broadcast_tmode(&self, channel: &str, log: &[ModeChange], source: Actor) {
        let Some(chan) = self.net.channel(channel) else {
            return;
        };
        let ts = chan.time.to_string();
        let name = chan.name.clone();
        let source_id = self.net.actor_id(source);
        for peer in self.links.iter() {
            if !peer.burst_sent {
                continue;
            }
            let table = self.net.perspective(peer.sid);
            for line in table.strings_from_changes(log, 4, true) {
                let mut params = vec![ts.clone(), name.clone(), line.modes];
                params.extend(line.params);
                peer.send(Message::new(Some(&source_id), "TMODE", params));
            }
        }
    }

    /// Join a local user to a channel, creating it if needed (the creator
    /// is opped), and advertise the join to the mesh.
    pub fn local_join(&mut self, uid: Uid, channel: &str, now: i64) -> bool {
        let me = self.net.me;
        let (chan, created) = self.net.channel_or_create(channel, now);
        let display = chan.name.clone();
        let ts = chan.time;
        if !self.net.join_user(&display, uid) {
            return false;
        }
        if created {
            apply_modes(
                &mut self.net,
                &self.blocks,
                &self.config.limits,
                &display,
                Actor::Server(me),
                &[("op".to_string(), Some(uid.to_string()))],
                true,
                true,
                now,
            );
        }
        let args = crate::event::EventArgs::member(&display, uid);
        self.bus.fire(&mut self.net, event_names::CHANNEL_JOIN, &args);
        self.bus.fire(&mut self.net, event_names::USER_JOINED, &args);

        let token = if created {
            format!("@{}", uid)
        } else {
            uid.to_string()
        };
        let sjoin = Message::new(
            Some(&self.net.me.to_string()),
            "SJOIN",
            [ts.to_string(), display, "+".to_string(), token],
        );
        self.links.broadcast(None, &sjoin);
        true
    }

    /// Part a local user from a channel and advertise it.
    pub fn local_part(&mut self, uid: Uid, channel: &str, reason: &str) -> bool {
        let Some(display) = self.net.channel(channel).map(|c| c.name.clone()) else {
            return false;
        };
        if !self.net.part_user(&display, uid) {
            return false;
        }
        self.bus.fire(
            &mut self.net,
            event_names::CHANNEL_PART,
            &crate::event::EventArgs::member(&display, uid),
        );
        let part = Message::new(
            Some(&uid.to_string()),
            "PART",
            [display.as_str(), reason],
        );
        self.links.broadcast(None, &part);
        destroy_maybe(&mut self.net, &self.bus, &display);
        true
    }

    /// Kick `target` out of a channel on behalf of a local member holding
    /// basic status.
    pub fn local_kick(&mut self, by: Uid, channel: &str, target: Uid, reason: &str) -> bool {
        let Some(display) = self.net.channel(channel).map(|c| c.name.clone()) else {
            return false;
        };
        let allowed = self.net.channel(&display).is_some_and(|c| {
            c.highest_level(self.net.table(), by)
                >= crate::state::apply::BASIC_STATUS_LEVEL
        });
        if !allowed {
            let nick = self.net.user(by).map(|u| u.nick.clone()).unwrap_or_default();
            let server = self.net.my_name();
            let msg = replies::chanop_privs_needed(&server, &nick, &display);
            self.net.send_numeric(by, msg);
            return false;
        }
        if !self.net.part_user(&display, target) {
            return false;
        }
        self.bus.fire(
            &mut self.net,
            event_names::CHANNEL_KICK,
            &crate::event::EventArgs {
                channel: Some(&display),
                user: Some(by),
                target: Some(target),
                text: Some(reason),
                ..Default::default()
            },
        );
        let target_token = target.to_string();
        let kick = Message::new(
            Some(&by.to_string()),
            "KICK",
            [display.as_str(), target_token.as_str(), reason],
        );
        self.links.broadcast(None, &kick);
        destroy_maybe(&mut self.net, &self.bus, &display);
        true
    }

    /// Whether `from` may message `target` (a nick or channel name):
    /// listeners on `user.can_message` may veto.
    pub fn user_can_message(&mut self, from: Uid, target: &str) -> bool {
        self.bus
            .fire(
                &mut self.net,
                event_names::USER_CAN_MESSAGE,
                &crate::event::EventArgs {
                    user: Some(from),
                    text: Some(target),
                    ..Default::default()
                },
            )
            .allowed()
    }

    /// Queue the NAMES reply for a local member.
    pub fn names_reply(&mut self, to: Uid, channel: &str, multi_prefix: bool) {
        let Some(nick) = self.net.user(to).map(|u| u.nick.clone()) else {
            return;
        };
        let server = self.net.my_name();
        let display = self
            .net
            .channel(channel)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| channel.to_string());
        for line in names_lines(&mut self.net, &self.bus, channel, multi_prefix) {
            let msg = replies::name_reply(&server, &nick, &display, &line);
            self.net.send_numeric(to, msg);
        }
        let end = replies::end_of_names(&server, &nick, &display);
        self.net.send_numeric(to, end);
    }

    /// Periodic maintenance: prune bans past their retention window.
    pub fn tick(&mut self, now: i64) {
        let pruned = self.bans.prune(now);
        if pruned > 0 {
            debug!(pruned, "pruned expired ban records");
        }
    }
}

/// Turn parsed mode changes into applicator requests.
pub fn requests_from_changes(changes: &[ModeChange]) -> Vec<(String, Option<String>)> {
    changes
        .iter()
        .map(|c| {
            (
                format!("{}{}", if c.set { '+' } else { '-' }, c.name),
                c.param.clone(),
            )
        })
        .collect()
}
