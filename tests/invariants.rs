//! Universal engine invariants: membership bidirectionality, status
//! containment, ban windows, and the local mode path.

mod common;

use common::{drain, engine, link_peer, local_user};
use meshirc_proto::{Sid, Uid};
use meshircd::state::ModeValue;

const NOW: i64 = 5000;

/// Membership edges hold in both directions for every user and channel.
fn assert_membership_bidirectional(engine: &meshircd::Engine) {
    for chan in engine.net.channels() {
        for &uid in &chan.users {
            let user = engine.net.user(uid).expect("member in pool");
            assert!(
                user.channels.iter().any(|c| c.eq_ignore_ascii_case(&chan.name)),
                "{} missing edge back to {}",
                uid,
                chan.name
            );
        }
    }
    for user in engine.net.users() {
        for name in &user.channels {
            let chan = engine.net.channel(name).expect("channel in pool");
            assert!(chan.is_member(user.uid));
        }
    }
}

/// Every status holder is a member.
fn assert_statuses_within_membership(engine: &meshircd::Engine) {
    for chan in engine.net.channels() {
        for value in chan.modes.values() {
            if let ModeValue::Status { users } = value {
                for uid in users {
                    assert!(chan.is_member(*uid), "status held by non-member {}", uid);
                }
            }
        }
    }
}

#[test]
fn membership_survives_burst_join_part_and_netsplit() {
    let mut engine = engine();
    let ann = local_user(&mut engine, "009AAAAAA", "ann");
    let mut rx = link_peer(&mut engine, Sid(0), "peer.test", &["EUID"], NOW);
    drain(&mut rx);

    engine.handle_line(
        Sid(0),
        ":001 EUID bob 1 800 +i bob r.test 198.51.100.2 001AAAAAB r.test * :Bob",
        NOW,
    );
    engine.net.channel_or_create("#a", 100);
    engine.net.join_user("#a", ann);
    engine.handle_line(Sid(0), ":000 SJOIN 100 #a + :@001AAAAAB", NOW);
    engine.handle_line(Sid(0), ":000 SJOIN 90 #b +nt :+001AAAAAB", NOW);

    assert_membership_bidirectional(&engine);
    assert_statuses_within_membership(&engine);

    // Remote user quits one channel's worth of state at a time.
    engine.handle_line(Sid(0), ":001AAAAAB QUIT :gone", NOW);
    assert!(engine.net.user(Uid::from_ts6("001AAAAAB").unwrap()).is_none());
    assert_membership_bidirectional(&engine);
    assert_statuses_within_membership(&engine);

    // Whole-link loss cleans the rest.
    engine.drop_link(Sid(0), None);
    assert!(engine.net.server(Sid(0)).is_none());
    assert_membership_bidirectional(&engine);
}

#[test]
fn empty_remote_channels_are_destroyed_on_quit() {
    let mut engine = engine();
    let mut rx = link_peer(&mut engine, Sid(0), "peer.test", &["EUID"], NOW);
    drain(&mut rx);
    engine.handle_line(
        Sid(0),
        ":001 EUID bob 1 800 +i bob r.test 198.51.100.2 001AAAAAB r.test * :Bob",
        NOW,
    );
    engine.handle_line(Sid(0), ":000 SJOIN 90 #only +nt :@001AAAAAB", NOW);
    assert!(engine.net.channel("#only").is_some());

    engine.handle_line(Sid(0), ":001AAAAAB QUIT :gone", NOW);
    assert!(engine.net.channel("#only").is_none());
}

#[test]
fn ban_windows_always_order() {
    let mut engine = engine();
    let mut rx = link_peer(&mut engine, Sid(0), "peer.test", &[], 1000);
    drain(&mut rx);

    for frame in [
        ":000 ENCAP * KLINE 600 a host.a :x",
        ":000 ENCAP * DLINE 60 198.51.100.1 :y",
        ":000 ENCAP * RESV 30 #warez 0 :z",
        ":000 ENCAP * NICKDELAY 15 stolen",
    ] {
        engine.handle_line(Sid(0), frame, 1000);
    }
    assert_eq!(engine.bans.len(), 4);
    for ban in engine.bans.iter() {
        assert!(ban.expires() >= ban.modified);
        assert!(ban.lifetime_end() >= ban.expires());
    }
}

#[test]
fn local_mode_path_enforces_and_broadcasts() {
    let mut engine = engine();
    let ann = local_user(&mut engine, "009AAAAAA", "ann");
    let bob = local_user(&mut engine, "009AAAAAB", "bob");
    engine.net.channel_or_create("#town", 4000);
    engine.net.join_user("#town", ann);
    engine.net.join_user("#town", bob);

    let mut rx = link_peer(&mut engine, Sid(0), "peer.test", &[], NOW);
    drain(&mut rx);

    // No status: refused, numeric queued, nothing on the wire.
    let log = engine.local_mode(ann, "#town", "+m", &[], NOW);
    assert!(log.is_empty());
    assert!(engine.net.client_out.iter().any(|(to, m)| *to == ann && m.command == "482"));
    assert!(drain(&mut rx).is_empty());

    // With op, the committed diff goes out as TMODE.
    engine.net.channel_mut("#town").unwrap().add_status("op", ann);
    let log = engine.local_mode(ann, "#town", "+mv", &["bob"], NOW);
    assert_eq!(log.len(), 2);
    let frames = drain(&mut rx);
    assert_eq!(frames, vec![":009AAAAAA TMODE 4000 #town +mv 009AAAAAB"]);

    assert_statuses_within_membership(&engine);
}

#[test]
fn names_output_groups_and_ranks_prefixes() {
    let mut engine = engine();
    let ann = local_user(&mut engine, "009AAAAAA", "ann");
    let bob = local_user(&mut engine, "009AAAAAB", "bob");
    engine.net.channel_or_create("#town", 4000);
    engine.net.join_user("#town", ann);
    engine.net.join_user("#town", bob);
    {
        let chan = engine.net.channel_mut("#town").unwrap();
        chan.add_status("op", ann);
        chan.add_status("voice", ann);
        chan.add_status("voice", bob);
    }

    engine.names_reply(ann, "#town", false);
    let single: Vec<String> = engine
        .net
        .client_out
        .drain(..)
        .map(|(_, m)| m.to_string())
        .collect();
    assert_eq!(single[0], ":hub.test 353 ann = #town :@ann +bob");
    assert!(single[1].starts_with(":hub.test 366 ann #town"));

    engine.names_reply(ann, "#town", true);
    let multi: Vec<String> = engine
        .net
        .client_out
        .drain(..)
        .map(|(_, m)| m.to_string())
        .collect();
    assert_eq!(multi[0], ":hub.test 353 ann = #town :@+ann +bob");
}

#[test]
fn take_lower_time_never_raises() {
    let mut engine = engine();
    engine.net.channel_or_create("#t", 1000);
    let chan = engine.net.channel_mut("#t").unwrap();
    for t in [1500, 1000, 900, 950, 900] {
        let before = chan.time;
        chan.take_lower_time(t, true);
        assert_eq!(chan.time, before.min(t));
    }
}
