//! TS6 identifier codec.
//!
//! Every server on the mesh is addressed by a 3-character SID and every user
//! by that SID followed by a 6-character base-36 counter, e.g. `001AAAAAB`.
//! Internally we keep the numeric forms (`u16` server id, `u64` counter) and
//! convert at the wire boundary.
//!
//! The UID digit alphabet is `A..Z` then `0..9`: `A` is zero and `9` is 35.
//! Counters start at 1, so counter 1 encodes as `AAAAAA`. Encoding and
//! decoding form a total bijection between `[1, 36^6]` and the 6-character
//! token space; the property tests in `tests/codec_roundtrip.rs` pin this.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Number of distinct 6-character UID suffixes (`36^6`).
pub const UID_SPACE: u64 = 2_176_782_336;

/// Identifier codec failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Ts6IdError {
    /// A SID token was not exactly three characters.
    #[error("SID must be 3 characters: {0:?}")]
    BadSidLength(String),

    /// A SID used letters; only the numeric subset `000`–`999` is carried.
    #[error("non-numeric SID not supported: {0:?}")]
    NonNumericSid(String),

    /// A UID token was not exactly nine characters.
    #[error("UID must be 9 characters: {0:?}")]
    BadUidLength(String),

    /// A UID suffix character was outside `A-Z0-9`.
    #[error("invalid UID character {ch:?} at position {pos}")]
    BadUidChar {
        /// The offending character.
        ch: char,
        /// Position within the 6-character suffix.
        pos: usize,
    },

    /// A counter was zero or above [`UID_SPACE`].
    #[error("UID counter out of range: {0}")]
    CounterOutOfRange(u64),
}

/// A server identifier.
///
/// Holds the internal numeric id; the wire form is the zero-padded decimal
/// rendering (`7` ⇔ `007`). SIDs with letters in positions 1–2 are valid
/// TS6 but are rejected here; extending the codec to base-36 positions is a
/// deliberate future widening, not an error-handling gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid(pub u16);

impl Sid {
    /// Parse a wire SID token.
    pub fn from_ts6(token: &str) -> Result<Self, Ts6IdError> {
        if token.chars().count() != 3 {
            return Err(Ts6IdError::BadSidLength(token.to_string()));
        }
        if !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Ts6IdError::NonNumericSid(token.to_string()));
        }
        // Three ASCII digits always fit in u16.
        Ok(Sid(token.parse().unwrap_or(0)))
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

impl FromStr for Sid {
    type Err = Ts6IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sid::from_ts6(s)
    }
}

/// A user identifier: originating server plus per-server counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid {
    /// Originating server.
    pub sid: Sid,
    /// Per-server counter, starting at 1.
    pub counter: u64,
}

impl Uid {
    /// Parse a 9-character wire UID.
    pub fn from_ts6(token: &str) -> Result<Self, Ts6IdError> {
        if !token.is_ascii() || token.len() != 9 {
            return Err(Ts6IdError::BadUidLength(token.to_string()));
        }
        let sid = Sid::from_ts6(&token[..3])?;
        let counter = decode_uid_counter(&token[3..])?;
        Ok(Uid { sid, counter })
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display only exists for valid counters; out-of-range is clamped
        // into the space rather than panicking in a formatter.
        let suffix = encode_uid_counter(self.counter.clamp(1, UID_SPACE))
            .unwrap_or_else(|_| "AAAAAA".into());
        write!(f, "{}{}", self.sid, suffix)
    }
}

/// Encode a counter `n ∈ [1, 36^6]` as a 6-character UID suffix.
pub fn encode_uid_counter(n: u64) -> Result<String, Ts6IdError> {
    if n == 0 || n > UID_SPACE {
        return Err(Ts6IdError::CounterOutOfRange(n));
    }
    let mut rem = n - 1;
    let mut out = [b'A'; 6];
    for slot in out.iter_mut().rev() {
        let digit = (rem % 36) as u8;
        *slot = if digit < 26 {
            b'A' + digit
        } else {
            b'0' + (digit - 26)
        };
        rem /= 36;
    }
    // The array is pure ASCII by construction.
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Decode a 6-character UID suffix back to its counter.
pub fn decode_uid_counter(suffix: &str) -> Result<u64, Ts6IdError> {
    if suffix.chars().count() != 6 {
        return Err(Ts6IdError::BadUidLength(suffix.to_string()));
    }
    let mut total: u64 = 0;
    for (pos, ch) in suffix.chars().enumerate() {
        let digit = match ch {
            'A'..='Z' => ch as u64 - 'A' as u64,
            '0'..='9' => ch as u64 - '0' as u64 + 26,
            _ => return Err(Ts6IdError::BadUidChar { ch, pos }),
        };
        total = total * 36 + digit;
    }
    Ok(total + 1)
}

/// Hands out UIDs for locally-introduced users and ephemeral actors.
#[derive(Debug)]
pub struct UidAllocator {
    sid: Sid,
    last: u64,
}

impl UidAllocator {
    /// A fresh allocator for the given server.
    pub fn new(sid: Sid) -> Self {
        Self { sid, last: 0 }
    }

    /// Allocate the next UID. The first allocation is counter 1 (`AAAAAA`).
    pub fn allocate(&mut self) -> Uid {
        self.last += 1;
        Uid {
            sid: self.sid,
            counter: self.last,
        }
    }
}
