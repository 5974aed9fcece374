//! Ban propagation end to end: burst behavior, capability fallback,
//! deletion, and the UID collision policy.

mod common;

use common::{drain, engine, link_peer, local_user};
use meshirc_proto::{Sid, Uid};
use meshircd::bans::{Ban, BanKind};
use meshircd::state::Actor;

#[test]
fn expired_ban_is_not_bursted_and_is_pruned_after_lifetime() {
    let mut engine = engine();
    // K-line at t=1000, duration 300, lifetime 600.
    engine
        .bans
        .create_or_update(Ban::kline(Sid(9), "bad", "host.test", "no", 1000, 300, 600, None));

    // Link completes at t=1400: expired, so nothing is advertised.
    let mut rx = link_peer(&mut engine, Sid(0), "peer.test", &["KLN", "UNKLN"], 1400);
    let burst = drain(&mut rx);
    assert!(!burst.iter().any(|f| f.contains("KLINE")));
    assert_eq!(engine.bans.len(), 1);

    // Past lifetime the record goes away entirely.
    engine.tick(1700);
    assert_eq!(engine.bans.len(), 0);
}

#[test]
fn active_ban_bursts_through_an_ephemeral_agent() {
    let mut engine = engine();
    engine
        .bans
        .create_or_update(Ban::kline(Sid(9), "bad", "host.test", "go away", 1000, 300, 600, None));

    let mut rx = link_peer(&mut engine, Sid(0), "peer.test", &["KLN"], 1100);
    let burst = drain(&mut rx);

    // No user to attribute the K-line to: the burst introduces an agent,
    // sources the ban from it, then quits it.
    let euid_at = burst
        .iter()
        .position(|f| f.contains("EUID ban-agent"))
        .expect("agent introduced");
    let kline_at = burst
        .iter()
        .position(|f| f.contains("KLINE * 200 bad host.test"))
        .expect("kline advertised");
    let quit_at = burst
        .iter()
        .position(|f| f.contains("QUIT") && f.contains("Ban flush"))
        .expect("agent quit");
    assert!(euid_at < kline_at && kline_at < quit_at);

    // The agent never entered the pool.
    assert_eq!(engine.net.users().count(), 0);
}

#[test]
fn kline_encoding_follows_peer_capabilities() {
    let mut engine = engine();
    let oper = local_user(&mut engine, "009AAAAAA", "oper");

    let mut rx_ban = link_peer(&mut engine, Sid(1), "ban.test", &["BAN", "KLN"], 1000);
    let mut rx_kln = link_peer(&mut engine, Sid(2), "kln.test", &["KLN", "UNKLN"], 1000);
    let mut rx_raw = link_peer(&mut engine, Sid(3), "raw.test", &[], 1000);
    drain(&mut rx_ban);
    drain(&mut rx_kln);
    drain(&mut rx_raw);

    let mut ban = Ban::kline(
        Sid(9),
        "user",
        "host",
        "go away",
        1000,
        300,
        600,
        Some(Actor::User(oper)),
    );
    ban.auser = "*".into();
    engine.add_ban(ban, None, 1000);

    assert_eq!(
        drain(&mut rx_ban),
        vec![":009AAAAAA BAN K user host 1000 300 600 * :go away"]
    );
    assert_eq!(
        drain(&mut rx_kln),
        vec![":009AAAAAA KLINE * 300 user host :go away"]
    );
    assert_eq!(
        drain(&mut rx_raw),
        vec![":009AAAAAA ENCAP * KLINE 300 user host :go away"]
    );
}

#[test]
fn received_kline_is_reencoded_for_other_peers_not_echoed() {
    let mut engine = engine();
    let mut rx_source = link_peer(&mut engine, Sid(0), "src.test", &["KLN"], 1000);
    let mut rx_ban = link_peer(&mut engine, Sid(1), "ban.test", &["BAN"], 1000);
    drain(&mut rx_source);
    drain(&mut rx_ban);
    engine.handle_line(
        Sid(0),
        ":000 EUID evil 1 900 +o oper src.test 198.51.100.9 000AAAAAA src.test * :Oper",
        1000,
    );
    drain(&mut rx_ban); // forwarded EUID

    engine.handle_line(Sid(0), ":000AAAAAA KLINE * 600 spam relay.test :begone", 1000);

    // Nothing bounces back to the source; the BAN-capable peer gets the
    // richer absolute form.
    assert!(drain(&mut rx_source).is_empty());
    let to_ban = drain(&mut rx_ban);
    assert_eq!(
        to_ban,
        vec![":000AAAAAA BAN K spam relay.test 1000 600 600 evil!oper@src.test :begone"]
    );

    let stored = engine
        .bans
        .by_user_input(BanKind::Kline, "spam@relay.test")
        .expect("stored");
    assert_eq!(stored.reason, "begone");
    assert!(stored.is_active(1100));
}

#[test]
fn unkline_disables_and_propagates_deletion() {
    let mut engine = engine();
    let oper = local_user(&mut engine, "009AAAAAA", "oper");
    let mut rx = link_peer(&mut engine, Sid(1), "peer.test", &["KLN", "UNKLN"], 1000);
    drain(&mut rx);

    let ban = Ban::kline(
        Sid(9),
        "user",
        "host",
        "go",
        1000,
        600,
        1200,
        Some(Actor::User(oper)),
    );
    let id = ban.id.clone();
    engine.add_ban(ban, None, 1000);
    drain(&mut rx);

    engine.delete_ban_by_input(
        BanKind::Kline,
        "user@host",
        Some(Actor::User(oper)),
        None,
        1100,
    );
    assert_eq!(drain(&mut rx), vec![":009AAAAAA UNKLINE * user host"]);
    let stored = engine.bans.get(&id).unwrap();
    assert!(stored.disabled);
    assert!(!stored.is_active(1100));
    assert!(stored.is_retained(1100));
}

#[test]
fn ban_frame_with_zero_duration_deletes() {
    let mut engine = engine();
    let mut rx = link_peer(&mut engine, Sid(0), "src.test", &["BAN"], 1000);
    drain(&mut rx);

    engine.handle_line(Sid(0), ":000 BAN K bad host.test 1000 600 900 oper :bye", 1000);
    let stored = engine
        .bans
        .by_user_input(BanKind::Kline, "bad@host.test")
        .unwrap();
    assert!(stored.is_active(1100));

    engine.handle_line(Sid(0), ":000 BAN K bad host.test 1200 0 900 oper :bye", 1200);
    let stored = engine
        .bans
        .by_user_input(BanKind::Kline, "bad@host.test")
        .unwrap();
    assert!(stored.disabled);
    assert!(!stored.is_active(1200));
}

#[test]
fn replayed_ban_with_same_creation_ts_does_not_repropagate() {
    let mut engine = engine();
    let mut rx_src = link_peer(&mut engine, Sid(0), "src.test", &["BAN"], 1000);
    let mut rx_other = link_peer(&mut engine, Sid(1), "other.test", &["BAN"], 1000);
    drain(&mut rx_src);
    drain(&mut rx_other);

    let frame = ":000 BAN K bad host.test 1000 600 900 oper :bye";
    engine.handle_line(Sid(0), frame, 1000);
    assert_eq!(drain(&mut rx_other).len(), 1);

    // The same advertisement coming back around the mesh is a no-op.
    engine.handle_line(Sid(1), frame, 1005);
    assert!(drain(&mut rx_src).is_empty());
    assert!(drain(&mut rx_other).is_empty());
}

#[test]
fn nick_delay_roundtrip() {
    let mut engine = engine();
    let mut rx = link_peer(&mut engine, Sid(0), "src.test", &[], 1000);
    drain(&mut rx);

    engine.handle_line(Sid(0), ":000 ENCAP * NICKDELAY 30 stolen", 1000);
    assert!(engine.bans.reserved("stolen", 1010).is_some());
    assert!(engine.bans.reserved("stolen", 1031).is_none());

    engine.handle_line(Sid(0), ":000 ENCAP * NICKDELAY 0 stolen", 1010);
    assert!(engine.bans.reserved("stolen", 1011).is_none());
}

#[test]
fn dline_enforces_on_matching_local_users() {
    let mut engine = engine();
    local_user(&mut engine, "009AAAAAA", "victim");
    let mut rx = link_peer(&mut engine, Sid(0), "src.test", &[], 1000);
    drain(&mut rx);

    engine.handle_line(Sid(0), ":000 ENCAP * DLINE 600 192.0.2.* :bad net", 1000);

    assert_eq!(engine.net.users().count(), 0);
    assert_eq!(engine.net.client_disconnects.len(), 1);
    assert!(engine.net.client_disconnects[0].1.contains("D-lined"));
    // The mesh hears the quit.
    let frames = drain(&mut rx);
    assert!(frames.iter().any(|f| f.starts_with(":009AAAAAA QUIT")));
}

#[test]
fn duplicate_uid_disconnects_the_link() {
    let mut engine = engine();
    local_user(&mut engine, "009AAAAAA", "ann");
    let mut rx = link_peer(&mut engine, Sid(0), "peer.test", &["EUID"], 1000);
    drain(&mut rx);

    engine.handle_line(
        Sid(0),
        ":000 EUID imposter 1 900 +i x h.test 198.51.100.8 009AAAAAA h.test * :X",
        1000,
    );

    // Link torn down with the collision reason; the original user stands.
    let frames = drain(&mut rx);
    assert!(frames.iter().any(|f| f.contains("ERROR") && f.contains("UID collision")));
    assert!(engine.links.get(Sid(0)).is_none());
    let ann = Uid::from_ts6("009AAAAAA").unwrap();
    assert_eq!(engine.net.user(ann).unwrap().nick, "ann");
    assert!(engine.net.server(Sid(0)).is_none());
}
