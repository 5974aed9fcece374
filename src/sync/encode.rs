//! Outbound ban encoding, per target peer capabilities.
//!
//! Every peer gets the richest form it understands:
//!
//! - K-lines: `BAN` (absolute creation TS, duration, lifetime) when the
//!   peer has the `BAN` capability; else direct `KLINE`/`UNKLINE` under
//!   `KLN`/`UNKLN`; else the `ENCAP` fallback.
//! - D-lines: always `ENCAP * DLINE` / `ENCAP * UNDLINE`.
//! - Reservations: `ENCAP * NICKDELAY` for nick delays (server-sourced),
//!   else `BAN R` when supported, else `ENCAP * RESV`.
//!
//! Non-`BAN` forms carry a *relative* duration (`expires - now`); a ban
//! with nothing left to say in that form is dropped. `KLINE`-family forms
//! require a user source; when the caller has none to offer, the outcome
//! says so and the caller decides (burst introduces the ban agent,
//! steady-state drops with an operator notice).

use meshirc_proto::{Message, Sid, Uid};

use crate::bans::{Ban, BanKind};
use crate::state::Server;

/// Result of encoding one ban for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// Frames to queue, in order.
    Frames(Vec<Message>),
    /// The selected form needs a user source and none was supplied.
    NeedUserSource,
    /// Nothing to say to this peer (expired relative form, or a deletion
    /// the peer cannot represent).
    Drop,
}

/// Encode `ban` for `peer`. `user_source` is the user the frame may be
/// attributed to, when the caller has one; `me` sources server-attributed
/// forms.
pub fn encode_ban(
    ban: &Ban,
    peer: &Server,
    me: Sid,
    user_source: Option<Uid>,
    now: i64,
) -> EncodeOutcome {
    match ban.kind {
        BanKind::Kline => encode_kline(ban, peer, me, user_source, now),
        BanKind::Dline => encode_dline(ban, user_source, now),
        BanKind::Resv => encode_resv(ban, peer, me, user_source, now),
        BanKind::NickDelay => encode_nick_delay(ban, me, now),
    }
}

fn ban_frame(ban: &Ban, source: String, letter: char, user: &str, host: &str) -> Message {
    Message::new(
        Some(&source),
        "BAN",
        [
            letter.to_string(),
            user.to_string(),
            host.to_string(),
            ban.modified.to_string(),
            ban.duration.to_string(),
            ban.lifetime.to_string(),
            ban.auser.clone(),
            ban.reason.clone(),
        ],
    )
}

/// Relative seconds left in the active window, if any.
fn relative_duration(ban: &Ban, now: i64) -> Option<i64> {
    let left = ban.expires() - now;
    (left > 0).then_some(left)
}

fn encode_kline(
    ban: &Ban,
    peer: &Server,
    me: Sid,
    user_source: Option<Uid>,
    now: i64,
) -> EncodeOutcome {
    let user = ban.match_user.as_deref().unwrap_or("*");
    let host = ban.match_host.as_deref().unwrap_or(&ban.mask);

    if peer.has_cap("BAN") {
        // BAN takes a user or a server source.
        let source = user_source
            .map(|u| u.to_string())
            .unwrap_or_else(|| me.to_string());
        return EncodeOutcome::Frames(vec![ban_frame(ban, source, 'K', user, host)]);
    }

    let Some(source) = user_source.map(|u| u.to_string()) else {
        return EncodeOutcome::NeedUserSource;
    };

    if ban.disabled {
        let frame = if peer.has_cap("UNKLN") {
            Message::new(Some(&source), "UNKLINE", ["*", user, host])
        } else {
            Message::new(Some(&source), "ENCAP", ["*", "UNKLINE", user, host])
        };
        return EncodeOutcome::Frames(vec![frame]);
    }

    let Some(duration) = relative_duration(ban, now) else {
        return EncodeOutcome::Drop;
    };
    let duration = duration.to_string();
    let frame = if peer.has_cap("KLN") {
        Message::new(
            Some(&source),
            "KLINE",
            ["*", duration.as_str(), user, host, ban.reason.as_str()],
        )
    } else {
        Message::new(
            Some(&source),
            "ENCAP",
            ["*", "KLINE", duration.as_str(), user, host, ban.reason.as_str()],
        )
    };
    EncodeOutcome::Frames(vec![frame])
}

fn encode_dline(ban: &Ban, user_source: Option<Uid>, now: i64) -> EncodeOutcome {
    let Some(source) = user_source.map(|u| u.to_string()) else {
        return EncodeOutcome::NeedUserSource;
    };
    if ban.disabled {
        return EncodeOutcome::Frames(vec![Message::new(
            Some(&source),
            "ENCAP",
            ["*", "UNDLINE", ban.mask.as_str()],
        )]);
    }
    let Some(duration) = relative_duration(ban, now) else {
        return EncodeOutcome::Drop;
    };
    EncodeOutcome::Frames(vec![Message::new(
        Some(&source),
        "ENCAP",
        [
            "*",
            "DLINE",
            duration.to_string().as_str(),
            ban.mask.as_str(),
            ban.reason.as_str(),
        ],
    )])
}

fn encode_resv(
    ban: &Ban,
    peer: &Server,
    me: Sid,
    user_source: Option<Uid>,
    now: i64,
) -> EncodeOutcome {
    if peer.has_cap("BAN") {
        let source = user_source
            .map(|u| u.to_string())
            .unwrap_or_else(|| me.to_string());
        return EncodeOutcome::Frames(vec![ban_frame(ban, source, 'R', "*", &ban.mask)]);
    }

    let Some(source) = user_source.map(|u| u.to_string()) else {
        return EncodeOutcome::NeedUserSource;
    };
    if ban.disabled {
        return EncodeOutcome::Frames(vec![Message::new(
            Some(&source),
            "ENCAP",
            ["*", "UNRESV", ban.mask.as_str()],
        )]);
    }
    let Some(duration) = relative_duration(ban, now) else {
        return EncodeOutcome::Drop;
    };
    EncodeOutcome::Frames(vec![Message::new(
        Some(&source),
        "ENCAP",
        [
            "*",
            "RESV",
            duration.to_string().as_str(),
            ban.mask.as_str(),
            "0",
            ban.reason.as_str(),
        ],
    )])
}

fn encode_nick_delay(ban: &Ban, me: Sid, now: i64) -> EncodeOutcome {
    // NICKDELAY is always server-sourced; duration 0 is the removal.
    let source = me.to_string();
    if ban.disabled {
        return EncodeOutcome::Frames(vec![Message::new(
            Some(&source),
            "ENCAP",
            ["*", "NICKDELAY", "0", ban.mask.as_str()],
        )]);
    }
    let Some(duration) = relative_duration(ban, now) else {
        return EncodeOutcome::Drop;
    };
    EncodeOutcome::Frames(vec![Message::new(
        Some(&source),
        "ENCAP",
        ["*", "NICKDELAY", duration.to_string().as_str(), ban.mask.as_str()],
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Actor;

    fn peer_with(caps: &[&str]) -> Server {
        let mut server = Server::new(Sid(2), "leaf.test", "Leaf", Some(Sid(2)));
        server.caps = caps.iter().map(|s| s.to_string()).collect();
        server
    }

    fn kline() -> Ban {
        let mut ban = Ban::kline(
            Sid(1),
            "user",
            "host",
            "no spam",
            1000,
            300,
            600,
            Some(Actor::User(Uid::from_ts6("001AAAAAA").unwrap())),
        );
        ban.auser = "*".into();
        ban
    }

    fn frames(outcome: EncodeOutcome) -> Vec<String> {
        match outcome {
            EncodeOutcome::Frames(f) => f.iter().map(|m| m.to_string()).collect(),
            other => panic!("expected frames, got {:?}", other),
        }
    }

    #[test]
    fn kline_prefers_ban_capability() {
        let uid = Uid::from_ts6("001AAAAAA").unwrap();
        let out = encode_ban(&kline(), &peer_with(&["BAN", "KLN"]), Sid(1), Some(uid), 1100);
        assert_eq!(
            frames(out),
            vec![":001AAAAAA BAN K user host 1000 300 600 * :no spam"]
        );
    }

    #[test]
    fn kline_falls_back_to_kln_with_relative_duration() {
        let uid = Uid::from_ts6("001AAAAAA").unwrap();
        let out = encode_ban(&kline(), &peer_with(&["KLN"]), Sid(1), Some(uid), 1000);
        assert_eq!(
            frames(out),
            vec![":001AAAAAA KLINE * 300 user host :no spam"]
        );
    }

    #[test]
    fn kline_last_resort_is_encap() {
        let uid = Uid::from_ts6("001AAAAAA").unwrap();
        let out = encode_ban(&kline(), &peer_with(&[]), Sid(1), Some(uid), 1100);
        assert_eq!(
            frames(out),
            vec![":001AAAAAA ENCAP * KLINE 200 user host :no spam"]
        );
    }

    #[test]
    fn expired_relative_form_is_dropped() {
        let uid = Uid::from_ts6("001AAAAAA").unwrap();
        let out = encode_ban(&kline(), &peer_with(&["KLN"]), Sid(1), Some(uid), 1300);
        assert_eq!(out, EncodeOutcome::Drop);
        // The absolute BAN form still goes out.
        let out = encode_ban(&kline(), &peer_with(&["BAN"]), Sid(1), Some(uid), 1300);
        assert!(matches!(out, EncodeOutcome::Frames(_)));
    }

    #[test]
    fn kline_without_user_source_needs_one_unless_ban_cap() {
        let out = encode_ban(&kline(), &peer_with(&["KLN"]), Sid(1), None, 1100);
        assert_eq!(out, EncodeOutcome::NeedUserSource);
        let out = encode_ban(&kline(), &peer_with(&["BAN"]), Sid(1), None, 1100);
        assert_eq!(
            frames(out),
            vec![":001 BAN K user host 1000 300 600 * :no spam"]
        );
    }

    #[test]
    fn deleted_kline_uses_unkline_forms() {
        let uid = Uid::from_ts6("001AAAAAA").unwrap();
        let mut ban = kline();
        ban.disable(1100, None);
        let out = encode_ban(&ban, &peer_with(&["UNKLN"]), Sid(1), Some(uid), 1100);
        assert_eq!(frames(out), vec![":001AAAAAA UNKLINE * user host"]);
        let out = encode_ban(&ban, &peer_with(&[]), Sid(1), Some(uid), 1100);
        assert_eq!(frames(out), vec![":001AAAAAA ENCAP * UNKLINE user host"]);
        let out = encode_ban(&ban, &peer_with(&["BAN"]), Sid(1), Some(uid), 1100);
        assert_eq!(
            frames(out),
            vec![":001AAAAAA BAN K user host 1100 0 500 * :no spam"]
        );
    }

    #[test]
    fn dline_is_always_encap() {
        let uid = Uid::from_ts6("001AAAAAA").unwrap();
        let ban = Ban::dline(Sid(1), "203.0.113.*", "bad net", 1000, 300, 300, None);
        let out = encode_ban(&ban, &peer_with(&["BAN", "KLN"]), Sid(1), Some(uid), 1000);
        assert_eq!(
            frames(out),
            vec![":001AAAAAA ENCAP * DLINE 300 203.0.113.* :bad net"]
        );
    }

    #[test]
    fn nick_delay_is_server_sourced_encap() {
        let ban = Ban::resv(Sid(1), "stolen", "held", 1000, 30, 30, None, true);
        let out = encode_ban(&ban, &peer_with(&["BAN"]), Sid(1), None, 1000);
        assert_eq!(frames(out), vec![":001 ENCAP * NICKDELAY 30 stolen"]);

        let mut gone = ban.clone();
        gone.disable(1010, None);
        let out = encode_ban(&gone, &peer_with(&[]), Sid(1), None, 1010);
        assert_eq!(frames(out), vec![":001 ENCAP * NICKDELAY 0 stolen"]);
    }

    #[test]
    fn resv_uses_ban_capability_or_encap() {
        let ban = Ban::resv(Sid(1), "#warez", "not here", 1000, 600, 900, None, false);
        let out = encode_ban(&ban, &peer_with(&["BAN"]), Sid(1), None, 1000);
        assert_eq!(
            frames(out),
            vec![":001 BAN R * #warez 1000 600 900 * :not here"]
        );
        let uid = Uid::from_ts6("001AAAAAA").unwrap();
        let out = encode_ban(&ban, &peer_with(&[]), Sid(1), Some(uid), 1100);
        assert_eq!(
            frames(out),
            vec![":001AAAAAA ENCAP * RESV 500 #warez 0 :not here"]
        );
    }
}
