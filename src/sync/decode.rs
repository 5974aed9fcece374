//! Inbound TS6 frame dispatch.
//!
//! Every frame from an established peer lands in [`dispatch`], which
//! translates it into pool/ban mutations (always through the mode
//! applicator or the ban engine; nothing writes state straight off the
//! wire) and re-propagates it to the rest of the mesh, never back to the
//! peer it came from. Ban-family frames are not forwarded verbatim: they
//! are re-encoded per peer capability set by the engine.
//!
//! Failures stay local to the frame: malformed input surfaces as a
//! deduplicated operator notice, and only identity collisions cost the
//! peer its link.

use meshirc_proto::{Message, ModeChange, Sid, Uid};
use tracing::debug;

use crate::bans::{Ban, BanKind};
use crate::engine::{requests_from_changes, Engine};
use crate::error::{HandlerError, HandlerResult};
use crate::event::{names, EventArgs};
use crate::state::apply::apply_modes;
use crate::state::{destroy_maybe, Actor, Server, User};

/// Handle one frame from the peer link `from`.
pub fn dispatch(engine: &mut Engine, from: Sid, msg: &Message, now: i64) -> HandlerResult {
    match msg.command.as_str() {
        "PING" => ping(engine, from, msg),
        "PONG" => Ok(()),
        "ERROR" => {
            debug!(peer = %from, "peer sent ERROR; closing link");
            engine.drop_link(from, None);
            Ok(())
        }
        "EUID" => euid(engine, from, msg, now),
        "SID" => sid(engine, from, msg),
        "SQUIT" => squit(engine, from, msg),
        "QUIT" => quit(engine, from, msg),
        "KILL" => kill(engine, from, msg),
        "SJOIN" => sjoin(engine, from, msg, now),
        "JOIN" => join(engine, from, msg),
        "PART" => part(engine, from, msg),
        "KICK" => kick(engine, from, msg),
        "TMODE" => tmode(engine, from, msg, now),
        "TB" => topic_burst(engine, from, msg),
        "KLINE" => kline(engine, from, msg, now),
        "UNKLINE" => unkline(engine, from, msg, now),
        "RESV" => resv(engine, from, msg, now),
        "UNRESV" => unresv(engine, from, msg, now),
        "BAN" => ban(engine, from, msg, now),
        "ENCAP" => encap(engine, from, msg, now),
        other => {
            debug!(peer = %from, command = %other, "ignoring unhandled command");
            Ok(())
        }
    }
}

/// SID of the server a frame originates from (the source prefix may be a
/// server or one of its users), defaulting to the direct peer.
fn origin_sid(msg: &Message, from: Sid) -> Sid {
    match msg.source.as_deref() {
        Some(token) if token.len() == 3 => Sid::from_ts6(token).unwrap_or(from),
        Some(token) => Uid::from_ts6(token).map(|u| u.sid).unwrap_or(from),
        None => from,
    }
}

/// Typed actor behind a frame's source prefix.
fn source_actor(msg: &Message, from: Sid) -> Actor {
    match msg.source.as_deref() {
        Some(token) if token.len() == 9 => Uid::from_ts6(token)
            .map(Actor::User)
            .unwrap_or(Actor::Server(from)),
        Some(token) => Sid::from_ts6(token)
            .map(Actor::Server)
            .unwrap_or(Actor::Server(from)),
        None => Actor::Server(from),
    }
}

fn ping(engine: &mut Engine, from: Sid, msg: &Message) -> HandlerResult {
    // A peer's PING after its burst means the burst is complete.
    if let Some(server) = engine.net.server_mut(from) {
        server.is_burst = false;
    }
    let origin = msg.arg(0).unwrap_or("").to_string();
    let me = engine.net.me.to_string();
    let name = engine.net.my_name();
    engine
        .links
        .send(from, Message::new(Some(&me), "PONG", [name, origin]));
    Ok(())
}

fn euid(engine: &mut Engine, from: Sid, msg: &Message, now: i64) -> HandlerResult {
    if msg.arg_count() < 11 {
        return Err(HandlerError::protocol(
            "euid.args",
            format!("EUID with {} params", msg.arg_count()),
        ));
    }
    let uid = Uid::from_ts6(msg.arg(7).unwrap())
        .map_err(|e| HandlerError::protocol("euid.uid", e.to_string()))?;
    if engine.net.user(uid).is_some() {
        return Err(HandlerError::Disconnect {
            reason: "UID collision".to_string(),
        });
    }

    let nick_time = msg.arg(2).unwrap_or("0").parse().unwrap_or(now);
    let modes = msg
        .arg(3)
        .unwrap_or("")
        .chars()
        .filter(|c| *c != '+' && *c != '-')
        .map(|c| c.to_string())
        .collect();
    let account = match msg.arg(9) {
        Some("*") | Some("") | None => None,
        Some(acct) => Some(acct.to_string()),
    };
    let user = User {
        uid,
        nick: msg.arg(0).unwrap().to_string(),
        ident: msg.arg(4).unwrap().to_string(),
        cloak: msg.arg(5).unwrap().to_string(),
        ip: msg.arg(6).unwrap().to_string(),
        host: msg.arg(8).unwrap().to_string(),
        real: msg.arg(10).unwrap().to_string(),
        nick_time,
        account,
        modes,
        server: uid.sid,
        location: from,
        channels: Vec::new(),
    };
    engine.net.add_user(user);
    engine
        .bus
        .fire(&mut engine.net, names::USER_NEW, &EventArgs {
            user: Some(uid),
            server: Some(uid.sid),
            ..EventArgs::default()
        });
    engine.forward(from, msg);
    Ok(())
}

fn sid(engine: &mut Engine, from: Sid, msg: &Message) -> HandlerResult {
    if msg.arg_count() < 4 {
        return Err(HandlerError::protocol("sid.args", "SID missing params"));
    }
    let sid = Sid::from_ts6(msg.arg(2).unwrap())
        .map_err(|e| HandlerError::protocol("sid.sid", e.to_string()))?;
    if engine.net.server(sid).is_some() {
        return Err(HandlerError::Disconnect {
            reason: "SID collision".to_string(),
        });
    }
    let server = Server::new(
        sid,
        msg.arg(0).unwrap(),
        msg.arg(3).unwrap_or(""),
        Some(from),
    );
    engine.net.add_server(server);
    engine.forward(from, msg);
    Ok(())
}

fn squit(engine: &mut Engine, from: Sid, msg: &Message) -> HandlerResult {
    let Some(target) = msg.arg(0).and_then(|t| Sid::from_ts6(t).ok()) else {
        return Err(HandlerError::protocol("squit.target", "bad SQUIT target"));
    };
    if target == engine.net.me {
        return Err(HandlerError::protocol("squit.self", "SQUIT for ourselves"));
    }
    let touched = engine.net.remove_server(target);
    for chan in touched {
        destroy_maybe(&mut engine.net, &engine.bus, &chan);
    }
    engine.links.remove(target);
    engine.forward(from, msg);
    Ok(())
}

fn quit(engine: &mut Engine, from: Sid, msg: &Message) -> HandlerResult {
    let Actor::User(uid) = source_actor(msg, from) else {
        return Err(HandlerError::protocol("quit.source", "QUIT from a server"));
    };
    let touched = engine.net.remove_user(uid);
    for chan in touched {
        destroy_maybe(&mut engine.net, &engine.bus, &chan);
    }
    engine.forward(from, msg);
    Ok(())
}

fn kill(engine: &mut Engine, from: Sid, msg: &Message) -> HandlerResult {
    let Some(target) = msg.arg(0).and_then(|t| Uid::from_ts6(t).ok()) else {
        return Err(HandlerError::protocol("kill.target", "bad KILL target"));
    };
    if let Some(user) = engine.net.user(target) {
        if user.is_local(engine.net.me) {
            let reason = format!("Killed ({})", msg.arg(1).unwrap_or("no reason"));
            engine.net.client_disconnects.push((target, reason));
        }
        let touched = engine.net.remove_user(target);
        for chan in touched {
            destroy_maybe(&mut engine.net, &engine.bus, &chan);
        }
    }
    engine.forward(from, msg);
    Ok(())
}

/// SJOIN: the TS collision resolution point.
fn sjoin(engine: &mut Engine, from: Sid, msg: &Message, now: i64) -> HandlerResult {
    if msg.arg_count() < 4 {
        return Err(HandlerError::protocol("sjoin.args", "SJOIN missing params"));
    }
    let ts: i64 = msg
        .arg(0)
        .unwrap()
        .parse()
        .map_err(|_| HandlerError::protocol("sjoin.ts", "bad SJOIN timestamp"))?;
    let chan_name = msg.arg(1).unwrap().to_string();
    let mode_str = msg.arg(2).unwrap().to_string();
    let mode_params: Vec<&str> = msg.params[3..msg.arg_count() - 1]
        .iter()
        .map(String::as_str)
        .collect();
    let nicklist = msg.params.last().unwrap().clone();

    let origin = origin_sid(msg, from);
    let table = engine.net.table().clone();
    let peer_table = engine.net.perspective(origin).clone();
    let (adv, unknown) = peer_table.changes_from_string(&mode_str, &mode_params);
    for letter in unknown {
        debug!(%letter, channel = %chan_name, peer = %origin, "dropping unknown mode letter in SJOIN");
    }

    // 1–3: find or create, snapshot, settle the timestamp.
    let (chan, created) = engine.net.channel_or_create(&chan_name, ts);
    let old_time = if created { ts } else { chan.time };
    let old_simple = chan.simple_changes(&table);
    let old_status = chan.status_changes(&table);
    let new_time = ts.min(old_time);
    chan.take_lower_time(new_time, true);
    let display = chan.name.clone();

    // 4: who wins the modes.
    let theirs_won = new_time < old_time;
    let tie = ts == old_time;
    let accept_statuses = theirs_won || tie;

    // 5: join the advertised members.
    let mut granted: Vec<(Uid, String)> = Vec::new();
    for token in nicklist.split_whitespace() {
        let prefix_len = token
            .chars()
            .take_while(|c| peer_table.status_by_prefix(*c).is_some())
            .count();
        let (prefixes, uid_token) = token.split_at(prefix_len);
        let Ok(uid) = Uid::from_ts6(uid_token) else {
            debug!(token = %token, "SJOIN token with unparsable UID");
            continue;
        };
        let located_here = engine.net.user(uid).is_some_and(|u| u.location == from);
        if !located_here {
            debug!(%uid, peer = %from, "SJOIN for user not behind this peer");
            continue;
        }
        if engine.net.join_user(&display, uid) {
            engine
                .bus
                .fire(&mut engine.net, names::USER_JOINED, &EventArgs::member(&display, uid));
        }
        if accept_statuses {
            for prefix in prefixes.chars() {
                if let Some(status) = peer_table.status_by_prefix(prefix) {
                    granted.push((uid, status.to_string()));
                }
            }
        }
    }

    // 6–7: assemble the effective diff.
    let mut changes: Vec<ModeChange> = Vec::new();
    if theirs_won {
        for old in &old_simple {
            if !adv.iter().any(|c| c.name == old.name) {
                changes.push(old.inverse());
            }
        }
        for stale in &old_status {
            changes.push(stale.inverse());
        }
    }
    if theirs_won || tie {
        changes.extend(adv.iter().cloned());
        for (uid, status) in &granted {
            changes.push(ModeChange::new(true, status, Some(&uid.to_string())));
        }
    }

    // 8: one forced pass through the applicator.
    let requests = requests_from_changes(&changes);
    apply_modes(
        &mut engine.net,
        &engine.blocks,
        &engine.config.limits,
        &display,
        Actor::Server(origin),
        &requests,
        true,
        true,
        now,
    );

    engine
        .bus
        .fire(&mut engine.net, names::CHANNEL_BURST, &EventArgs::channel(&display));
    engine.forward(from, msg);
    Ok(())
}

/// Post-burst single join: `:uid JOIN <ts> <chan> +`.
fn join(engine: &mut Engine, from: Sid, msg: &Message) -> HandlerResult {
    let Actor::User(uid) = source_actor(msg, from) else {
        return Err(HandlerError::protocol("join.source", "JOIN from a server"));
    };
    if msg.arg(0) == Some("0") {
        // JOIN 0 (part everything) belongs to the client protocol.
        debug!(%uid, "ignoring JOIN 0 over the link");
        return Ok(());
    }
    if msg.arg_count() < 2 {
        return Err(HandlerError::protocol("join.args", "JOIN missing params"));
    }
    let ts: i64 = msg
        .arg(0)
        .unwrap()
        .parse()
        .map_err(|_| HandlerError::protocol("join.ts", "bad JOIN timestamp"))?;
    let chan_name = msg.arg(1).unwrap().to_string();

    let (chan, _created) = engine.net.channel_or_create(&chan_name, ts);
    chan.take_lower_time(ts, true);
    let display = chan.name.clone();
    if engine.net.join_user(&display, uid) {
        engine
            .bus
            .fire(&mut engine.net, names::USER_JOINED, &EventArgs::member(&display, uid));
    }
    engine.forward(from, msg);
    Ok(())
}

/// `:uid PART <chan> [:reason]`
fn part(engine: &mut Engine, from: Sid, msg: &Message) -> HandlerResult {
    let Actor::User(uid) = source_actor(msg, from) else {
        return Err(HandlerError::protocol("part.source", "PART from a server"));
    };
    let Some(chan_name) = msg.arg(0).map(str::to_string) else {
        return Err(HandlerError::protocol("part.args", "PART missing channel"));
    };
    if engine.net.part_user(&chan_name, uid) {
        engine.bus.fire(
            &mut engine.net,
            names::CHANNEL_PART,
            &EventArgs::member(&chan_name, uid),
        );
        destroy_maybe(&mut engine.net, &engine.bus, &chan_name);
        engine.forward(from, msg);
    }
    Ok(())
}

/// `:src KICK <chan> <target-uid> :<reason>`
fn kick(engine: &mut Engine, from: Sid, msg: &Message) -> HandlerResult {
    if msg.arg_count() < 2 {
        return Err(HandlerError::protocol("kick.args", "KICK missing params"));
    }
    let chan_name = msg.arg(0).unwrap().to_string();
    let Some(target) = msg.arg(1).and_then(|t| Uid::from_ts6(t).ok()) else {
        return Err(HandlerError::protocol("kick.target", "bad KICK target"));
    };
    if engine.net.part_user(&chan_name, target) {
        let by = source_actor(msg, from).user();
        engine.bus.fire(
            &mut engine.net,
            names::CHANNEL_KICK,
            &EventArgs {
                channel: Some(&chan_name),
                user: by,
                target: Some(target),
                text: msg.arg(2),
                ..Default::default()
            },
        );
        destroy_maybe(&mut engine.net, &engine.bus, &chan_name);
        engine.forward(from, msg);
    }
    Ok(())
}

fn tmode(engine: &mut Engine, from: Sid, msg: &Message, now: i64) -> HandlerResult {
    if msg.arg_count() < 3 {
        return Err(HandlerError::protocol("tmode.args", "TMODE missing params"));
    }
    let ts: i64 = msg
        .arg(0)
        .unwrap()
        .parse()
        .map_err(|_| HandlerError::protocol("tmode.ts", "bad TMODE timestamp"))?;
    let chan_name = msg.arg(1).unwrap().to_string();
    let Some(chan) = engine.net.channel(&chan_name) else {
        debug!(channel = %chan_name, "TMODE for unknown channel");
        return Ok(());
    };
    // A higher TS means the sender lost a collision it has not yet seen.
    if ts > chan.time {
        debug!(channel = %chan_name, ts, ours = chan.time, "ignoring TMODE with newer TS");
        return Ok(());
    }

    let origin = origin_sid(msg, from);
    let peer_table = engine.net.perspective(origin).clone();
    let args: Vec<&str> = msg.params[3..].iter().map(String::as_str).collect();
    let (changes, unknown) = peer_table.changes_from_string(msg.arg(2).unwrap(), &args);
    for letter in unknown {
        debug!(%letter, channel = %chan_name, "dropping unknown mode letter in TMODE");
    }
    let requests = requests_from_changes(&changes);
    apply_modes(
        &mut engine.net,
        &engine.blocks,
        &engine.config.limits,
        &chan_name,
        source_actor(msg, from),
        &requests,
        true,
        true,
        now,
    );
    engine.forward(from, msg);
    Ok(())
}

fn topic_burst(engine: &mut Engine, from: Sid, msg: &Message) -> HandlerResult {
    if msg.arg_count() < 3 {
        return Err(HandlerError::protocol("tb.args", "TB missing params"));
    }
    let chan_name = msg.arg(0).unwrap().to_string();
    let ts: i64 = msg
        .arg(1)
        .unwrap()
        .parse()
        .map_err(|_| HandlerError::protocol("tb.ts", "bad TB timestamp"))?;
    let origin = origin_sid(msg, from);
    let (set_by, text) = if msg.arg_count() >= 4 {
        (msg.arg(2).unwrap().to_string(), msg.arg(3).unwrap())
    } else {
        let name = engine
            .net
            .server(origin)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| origin.to_string());
        (name, msg.arg(2).unwrap())
    };
    let text = text.to_string();

    let Some(chan) = engine.net.channel_mut(&chan_name) else {
        debug!(channel = %chan_name, "TB for unknown channel");
        return Ok(());
    };
    // An older topic wins the burst; otherwise ours stands.
    let accept = match &chan.topic {
        None => true,
        Some(current) => ts < current.set_at,
    };
    if accept {
        chan.do_topic(&text, &set_by, ts, origin);
        engine.forward(from, msg);
    }
    Ok(())
}

// --- ban family ------------------------------------------------------------

/// Fill origin attribution fields shared by every decoded ban.
fn attribute(engine: &Engine, ban: &mut Ban, origin: Sid, actor: Actor) {
    ban.aserver = engine
        .net
        .server(origin)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| origin.to_string());
    ban.auser = match actor {
        Actor::User(uid) => engine
            .net
            .user(uid)
            .map(|u| u.hostmask())
            .unwrap_or_else(|| uid.to_string()),
        Actor::Server(_) => "*".to_string(),
    };
    ban.recent_source = Some(actor);
}

fn kline(engine: &mut Engine, from: Sid, msg: &Message, now: i64) -> HandlerResult {
    // :uid KLINE <target> <duration> <user> <host> :<reason>
    if msg.arg_count() < 4 {
        return Err(HandlerError::protocol("kline.args", "KLINE missing params"));
    }
    let duration: i64 = msg
        .arg(1)
        .unwrap()
        .parse()
        .map_err(|_| HandlerError::protocol("kline.duration", "bad KLINE duration"))?;
    let user = msg.arg(2).unwrap();
    let host = msg.arg(3).unwrap();
    let reason = msg.arg(4).unwrap_or("<no reason>");

    let origin = origin_sid(msg, from);
    let actor = source_actor(msg, from);
    let mut ban = Ban::kline(origin, user, host, reason, now, duration, duration, None);
    attribute(engine, &mut ban, origin, actor);
    engine.add_ban(ban, Some(from), now);
    Ok(())
}

fn unkline(engine: &mut Engine, from: Sid, msg: &Message, now: i64) -> HandlerResult {
    // :uid UNKLINE <target> <user> <host>
    if msg.arg_count() < 3 {
        return Err(HandlerError::protocol("unkline.args", "UNKLINE missing params"));
    }
    let mask = format!("{}@{}", msg.arg(1).unwrap(), msg.arg(2).unwrap());
    let actor = source_actor(msg, from);
    engine.delete_ban_by_input(BanKind::Kline, &mask, Some(actor), Some(from), now);
    Ok(())
}

fn resv(engine: &mut Engine, from: Sid, msg: &Message, now: i64) -> HandlerResult {
    // :uid RESV <target> <duration> <mask> :<reason>
    if msg.arg_count() < 3 {
        return Err(HandlerError::protocol("resv.args", "RESV missing params"));
    }
    let duration: i64 = msg
        .arg(1)
        .unwrap()
        .parse()
        .map_err(|_| HandlerError::protocol("resv.duration", "bad RESV duration"))?;
    let mask = msg.arg(2).unwrap();
    let reason = msg.arg(3).unwrap_or("<no reason>");

    let origin = origin_sid(msg, from);
    let actor = source_actor(msg, from);
    let mut ban = Ban::resv(origin, mask, reason, now, duration, duration, None, false);
    attribute(engine, &mut ban, origin, actor);
    engine.add_ban(ban, Some(from), now);
    Ok(())
}

fn unresv(engine: &mut Engine, from: Sid, msg: &Message, now: i64) -> HandlerResult {
    // :uid UNRESV <target> <mask>
    let Some(mask) = msg.arg(1) else {
        return Err(HandlerError::protocol("unresv.args", "UNRESV missing params"));
    };
    let mask = mask.to_string();
    let actor = source_actor(msg, from);
    engine.delete_ban_by_input(BanKind::Resv, &mask, Some(actor), Some(from), now);
    Ok(())
}

fn ban(engine: &mut Engine, from: Sid, msg: &Message, now: i64) -> HandlerResult {
    // :src BAN <type> <user> <host> <creationTS> <duration> <lifetime> <oper> :<reason>
    if msg.arg_count() < 7 {
        return Err(HandlerError::protocol("ban.args", "BAN missing params"));
    }
    let Some(kind) = BanKind::from_ban_letter(msg.arg(0).unwrap()) else {
        return Err(HandlerError::protocol(
            "ban.type",
            format!("unknown ban type letter {:?}", msg.arg(0).unwrap()),
        ));
    };
    let parse_i64 = |i: usize, what: &'static str| {
        msg.arg(i)
            .unwrap()
            .parse::<i64>()
            .map_err(|_| HandlerError::protocol(what, "bad BAN number"))
    };
    let creation = parse_i64(3, "ban.creation")?;
    let duration = parse_i64(4, "ban.duration")?;
    let lifetime = parse_i64(5, "ban.lifetime")?;
    let reason = msg.arg(7).unwrap_or("<no reason>");

    let origin = origin_sid(msg, from);
    let actor = source_actor(msg, from);
    let mut ban = match kind {
        BanKind::Kline => Ban::kline(
            origin,
            msg.arg(1).unwrap(),
            msg.arg(2).unwrap(),
            reason,
            creation,
            duration,
            lifetime,
            None,
        ),
        BanKind::Resv => Ban::resv(
            origin,
            msg.arg(2).unwrap(),
            reason,
            creation,
            duration,
            lifetime,
            None,
            false,
        ),
        _ => unreachable!("from_ban_letter only yields K and R"),
    };
    // Duration 0 is the deletion overload.
    ban.disabled = duration == 0;
    attribute(engine, &mut ban, origin, actor);
    ban.auser = msg.arg(6).unwrap().to_string();
    engine.add_ban(ban, Some(from), now);
    Ok(())
}

fn encap(engine: &mut Engine, from: Sid, msg: &Message, now: i64) -> HandlerResult {
    // :src ENCAP <target-mask> <subcommand> args...
    // Targets are treated as global regardless of mask.
    let Some(sub) = msg.arg(1) else {
        return Err(HandlerError::protocol("encap.args", "ENCAP missing subcommand"));
    };
    let origin = origin_sid(msg, from);
    let actor = source_actor(msg, from);
    let arg = |i: usize| msg.arg(i + 2).map(str::to_string);
    let parse_dur = |i: usize, what: &'static str| {
        arg(i)
            .and_then(|d| d.parse::<i64>().ok())
            .ok_or(HandlerError::protocol(what, "bad ENCAP duration"))
    };

    match sub {
        "KLINE" => {
            // ENCAP * KLINE <duration> <user> <host> :<reason>
            let duration = parse_dur(0, "encap.kline")?;
            let (Some(user), Some(host)) = (arg(1), arg(2)) else {
                return Err(HandlerError::protocol("encap.kline", "KLINE missing mask"));
            };
            let reason = arg(3).unwrap_or_else(|| "<no reason>".into());
            let mut ban = Ban::kline(origin, &user, &host, &reason, now, duration, duration, None);
            attribute(engine, &mut ban, origin, actor);
            engine.add_ban(ban, Some(from), now);
        }
        "UNKLINE" => {
            let (Some(user), Some(host)) = (arg(0), arg(1)) else {
                return Err(HandlerError::protocol("encap.unkline", "UNKLINE missing mask"));
            };
            let mask = format!("{}@{}", user, host);
            engine.delete_ban_by_input(BanKind::Kline, &mask, Some(actor), Some(from), now);
        }
        "DLINE" => {
            // ENCAP * DLINE <duration> <ip> :<reason>
            let duration = parse_dur(0, "encap.dline")?;
            let Some(ip) = arg(1) else {
                return Err(HandlerError::protocol("encap.dline", "DLINE missing mask"));
            };
            let reason = arg(2).unwrap_or_else(|| "<no reason>".into());
            let mut ban = Ban::dline(origin, &ip, &reason, now, duration, duration, None);
            attribute(engine, &mut ban, origin, actor);
            engine.add_ban(ban, Some(from), now);
        }
        "UNDLINE" => {
            let Some(ip) = arg(0) else {
                return Err(HandlerError::protocol("encap.undline", "UNDLINE missing mask"));
            };
            engine.delete_ban_by_input(BanKind::Dline, &ip, Some(actor), Some(from), now);
        }
        "RESV" => {
            // ENCAP * RESV <duration> <mask> <ignored> :<reason>
            let duration = parse_dur(0, "encap.resv")?;
            let Some(mask) = arg(1) else {
                return Err(HandlerError::protocol("encap.resv", "RESV missing mask"));
            };
            let reason = arg(3).unwrap_or_else(|| "<no reason>".into());
            let mut ban = Ban::resv(origin, &mask, &reason, now, duration, duration, None, false);
            attribute(engine, &mut ban, origin, actor);
            engine.add_ban(ban, Some(from), now);
        }
        "UNRESV" => {
            let Some(mask) = arg(0) else {
                return Err(HandlerError::protocol("encap.unresv", "UNRESV missing mask"));
            };
            engine.delete_ban_by_input(BanKind::Resv, &mask, Some(actor), Some(from), now);
        }
        "NICKDELAY" => {
            // ENCAP * NICKDELAY <duration> <nick>; 0 removes.
            let duration = parse_dur(0, "encap.nickdelay")?;
            let Some(nick) = arg(1) else {
                return Err(HandlerError::protocol("encap.nickdelay", "NICKDELAY missing nick"));
            };
            if duration == 0 {
                engine.delete_ban_by_input(
                    BanKind::NickDelay,
                    &nick,
                    Some(Actor::Server(origin)),
                    Some(from),
                    now,
                );
            } else {
                let mut ban = Ban::resv(
                    origin,
                    &nick,
                    "Nick delayed",
                    now,
                    duration,
                    duration,
                    None,
                    true,
                );
                attribute(engine, &mut ban, origin, Actor::Server(origin));
                engine.add_ban(ban, Some(from), now);
            }
        }
        other => {
            debug!(sub = %other, "forwarding unhandled ENCAP verbatim");
            engine.forward(from, msg);
        }
    }
    Ok(())
}
