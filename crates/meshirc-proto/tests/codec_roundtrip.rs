//! Property-based tests for the identifier codec and frame parser.
//!
//! The UID codec must be a total bijection between counters `[1, 36^6]`
//! and 6-character tokens over `A-Z0-9`; the frame parser must agree with
//! its own serializer on everything it accepts.

use proptest::prelude::*;

use meshirc_proto::ts6::{decode_uid_counter, encode_uid_counter, UID_SPACE};
use meshirc_proto::{Message, Sid, Uid};

fn uid_suffix_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z0-9]{6}").expect("valid regex")
}

fn sid_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9]{3}").expect("valid regex")
}

proptest! {
    #[test]
    fn counter_survives_roundtrip(n in 1u64..=UID_SPACE) {
        let token = encode_uid_counter(n).unwrap();
        prop_assert_eq!(token.len(), 6);
        prop_assert_eq!(decode_uid_counter(&token).unwrap(), n);
    }

    #[test]
    fn token_survives_roundtrip(token in uid_suffix_strategy()) {
        let n = decode_uid_counter(&token).unwrap();
        prop_assert!(n >= 1 && n <= UID_SPACE);
        prop_assert_eq!(encode_uid_counter(n).unwrap(), token);
    }

    #[test]
    fn encoding_is_order_preserving(a in 1u64..=UID_SPACE, b in 1u64..=UID_SPACE) {
        // The digit alphabet A..Z,0..9 is ordered, so token comparison
        // must agree with counter comparison.
        let ta = encode_uid_counter(a).unwrap();
        let tb = encode_uid_counter(b).unwrap();
        prop_assert_eq!(a.cmp(&b), ta.cmp(&tb));
    }

    #[test]
    fn full_uid_roundtrip(sid in sid_strategy(), suffix in uid_suffix_strategy()) {
        let token = format!("{}{}", sid, suffix);
        let uid = Uid::from_ts6(&token).unwrap();
        prop_assert_eq!(uid.to_string(), token);
    }

    #[test]
    fn sid_roundtrip(n in 0u16..=999) {
        let sid = Sid(n);
        prop_assert_eq!(Sid::from_ts6(&sid.to_string()).unwrap(), sid);
    }

    #[test]
    fn frame_reparse_is_identity(
        source in prop::option::of("[0-9][0-9A-Z]{2}"),
        command in "[A-Z]{2,10}",
        words in prop::collection::vec("[a-zA-Z0-9#+*@!.-]{1,12}", 0..6),
        trailing in prop::option::of("[a-zA-Z0-9 :!,.-]{0,40}"),
    ) {
        let mut params = words;
        if let Some(t) = trailing {
            params.push(t);
        }
        let msg = Message::new(source.as_deref(), &command, params);
        let reparsed: Message = msg.to_string().parse().unwrap();
        prop_assert_eq!(reparsed, msg);
    }
}
