//! # meshirc-proto
//!
//! Wire-format support for a TS6-linked IRC server mesh:
//!
//! - TS6 frame parsing and serialization ([`Message`])
//! - The SID/UID identifier codec ([`ts6`])
//! - Per-perspective channel mode tables ([`mode`])
//! - RFC 1459 case mapping and mask matching ([`casemap`], [`util`])
//!
//! The crate is deliberately free of I/O and runtime state: everything here
//! is a pure function over strings and small value types, so the server core
//! can be exercised in tests without a socket in sight.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod casemap;
pub mod error;
pub mod message;
pub mod mode;
pub mod ts6;
pub mod util;

pub use self::casemap::{irc_eq, irc_lower_char, irc_to_lower};
pub use self::error::{MessageParseError, ProtocolError};
pub use self::message::Message;
pub use self::mode::{ModeChange, ModeKind, ModeLine, ModeTable};
pub use self::ts6::{Sid, Ts6IdError, Uid, UidAllocator};
pub use self::util::{truncate_utf8_safe, wildcard_match};
