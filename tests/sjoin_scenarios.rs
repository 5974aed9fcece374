//! SJOIN timestamp collision scenarios, end to end: frames in, channel
//! state out.

mod common;

use common::{drain, engine, link_peer, local_user};
use meshirc_proto::{Message, Sid, Uid};
use meshircd::Engine;

const NOW: i64 = 5000;

/// Engine with peer 000 linked and `bob` (001AAAAAB) introduced behind it.
fn engine_with_peer() -> (Engine, tokio::sync::mpsc::UnboundedReceiver<Message>) {
    let mut engine = engine();
    let mut rx = link_peer(&mut engine, Sid(0), "peer.test", &["EUID", "BAN"], NOW);
    drain(&mut rx); // our burst
    engine.handle_line(
        Sid(0),
        ":001 EUID bob 1 800 +i bob remote.test 198.51.100.2 001AAAAAB remote.test * :Bob",
        NOW,
    );
    (engine, rx)
}

#[test]
fn their_older_ts_wins_and_resets_modes() {
    let (mut engine, _rx) = engine_with_peer();
    let ann = local_user(&mut engine, "009AAAAAA", "ann");
    engine.net.channel_or_create("#x", 1000);
    engine.net.join_user("#x", ann);
    {
        let chan = engine.net.channel_mut("#x").unwrap();
        chan.set_simple("no_ext", 1000);
        chan.set_simple("topic_lock", 1000);
        chan.add_status("op", ann);
    }

    engine.handle_line(Sid(0), ":000 SJOIN 900 #x +m :@001AAAAAB", NOW);

    let bob = Uid::from_ts6("001AAAAAB").unwrap();
    let chan = engine.net.channel("#x").unwrap();
    assert_eq!(chan.time, 900);
    assert!(chan.has_mode("moderated"));
    assert!(!chan.has_mode("no_ext"));
    assert!(!chan.has_mode("topic_lock"));
    assert!(!chan.has_status("op", ann));
    assert!(chan.is_member(ann));
    assert!(chan.is_member(bob));
    assert!(chan.has_status("op", bob));
}

#[test]
fn equal_ts_merges_both_sides() {
    let (mut engine, _rx) = engine_with_peer();
    let ann = local_user(&mut engine, "009AAAAAA", "ann");
    engine.net.channel_or_create("#y", 500);
    engine.net.join_user("#y", ann);
    {
        let chan = engine.net.channel_mut("#y").unwrap();
        chan.set_simple("no_ext", 500);
        chan.add_status("op", ann);
    }

    engine.handle_line(Sid(0), ":000 SJOIN 500 #y +t :+001AAAAAB", NOW);

    let bob = Uid::from_ts6("001AAAAAB").unwrap();
    let chan = engine.net.channel("#y").unwrap();
    assert_eq!(chan.time, 500);
    assert!(chan.has_mode("no_ext"));
    assert!(chan.has_mode("topic_lock"));
    assert!(chan.has_status("op", ann));
    assert!(chan.is_member(bob));
    assert!(chan.has_status("voice", bob));
    assert!(!chan.has_status("op", bob));
}

#[test]
fn our_older_ts_keeps_modes_and_strips_their_statuses() {
    let (mut engine, _rx) = engine_with_peer();
    engine.net.channel_or_create("#z", 100);
    engine
        .net
        .channel_mut("#z")
        .unwrap()
        .set_simple("invite_only", 100);

    engine.handle_line(Sid(0), ":000 SJOIN 200 #z +m :@001AAAAAB", NOW);

    let bob = Uid::from_ts6("001AAAAAB").unwrap();
    let chan = engine.net.channel("#z").unwrap();
    assert_eq!(chan.time, 100);
    assert!(chan.has_mode("invite_only"));
    assert!(!chan.has_mode("moderated"));
    assert!(chan.is_member(bob));
    assert!(!chan.has_status("op", bob));
}

#[test]
fn lower_ts_state_wins_regardless_of_arrival_order() {
    // Two bursts for the same channel with different timestamps must
    // converge on the older one's state either way around.
    let run = |first: &str, second: &str| {
        let (mut engine, _rx) = engine_with_peer();
        engine.handle_line(
            Sid(0),
            ":001 EUID carol 1 800 +i carol remote.test 198.51.100.3 001AAAAAC remote.test * :Carol",
            NOW,
        );
        engine.handle_line(Sid(0), first, NOW);
        engine.handle_line(Sid(0), second, NOW);
        let chan = engine.net.channel("#race").unwrap().clone();
        chan
    };

    let older_first = run(
        ":000 SJOIN 900 #race +m :@001AAAAAB",
        ":000 SJOIN 1100 #race +i :@001AAAAAC",
    );
    let newer_first = run(
        ":000 SJOIN 1100 #race +i :@001AAAAAC",
        ":000 SJOIN 900 #race +m :@001AAAAAB",
    );

    for chan in [&older_first, &newer_first] {
        assert_eq!(chan.time, 900);
        assert!(chan.has_mode("moderated"));
        assert!(!chan.has_mode("invite_only"));
        let bob = Uid::from_ts6("001AAAAAB").unwrap();
        assert!(chan.is_member(bob));
        assert!(chan.has_status("op", bob));
    }
}

#[test]
fn sjoin_is_forwarded_but_not_to_its_source() {
    let (mut engine, mut rx_source) = engine_with_peer();
    let mut rx_other = link_peer(&mut engine, Sid(3), "other.test", &["EUID"], NOW);
    drain(&mut rx_other);

    engine.handle_line(Sid(0), ":000 SJOIN 900 #fwd +nt :@001AAAAAB", NOW);

    let to_other = drain(&mut rx_other);
    assert!(to_other.iter().any(|f| f.contains("SJOIN 900 #fwd")));
    let back_to_source = drain(&mut rx_source);
    assert!(!back_to_source.iter().any(|f| f.contains("SJOIN")));
}

#[test]
fn burst_advertises_channels_with_modes_and_statuses() {
    let mut engine = engine();
    let ann = local_user(&mut engine, "009AAAAAA", "ann");
    engine.net.channel_or_create("#home", 4200);
    engine.net.join_user("#home", ann);
    {
        let chan = engine.net.channel_mut("#home").unwrap();
        chan.set_simple("no_ext", 4200);
        chan.set_param("limit", "5", 4200);
        chan.add_status("op", ann);
    }

    let mut rx = link_peer(&mut engine, Sid(0), "peer.test", &["EUID"], NOW);
    let burst = drain(&mut rx);
    assert!(burst
        .iter()
        .any(|f| f.starts_with(":009 EUID ann 1 100")));
    assert!(burst
        .iter()
        .any(|f| f == ":009 SJOIN 4200 #home +ln 5 @009AAAAAA"));
    assert!(burst.iter().any(|f| f.starts_with(":009 PING")));
}
