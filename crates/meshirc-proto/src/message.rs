//! TS6 frame parsing and serialization.
//!
//! A server-to-server frame is a single line of the form
//!
//! ```text
//! [:source] COMMAND param param ... [:trailing]
//! ```
//!
//! The source is an opaque SID or UID token. Unlike the client protocol,
//! TS6 frames carry no IRCv3 tags. The trailing parameter (introduced by
//! `:`) may contain spaces and is stored as an ordinary last parameter.

use std::fmt;
use std::str::FromStr;

use crate::error::MessageParseError;

/// An owned, parsed TS6 frame.
///
/// # Example
///
/// ```
/// use meshirc_proto::Message;
///
/// let msg: Message = ":000 SJOIN 900 #x +m :@001AAAAAB".parse().unwrap();
/// assert_eq!(msg.source.as_deref(), Some("000"));
/// assert_eq!(msg.command, "SJOIN");
/// assert_eq!(msg.arg(3), Some("@001AAAAAB"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Frame source: a SID or UID, without the leading `:`.
    pub source: Option<String>,
    /// Command token, uppercased.
    pub command: String,
    /// Positional parameters; a trailing parameter is the last element.
    pub params: Vec<String>,
}

impl Message {
    /// Build a frame from parts. Parameters are taken as-is; whether the
    /// last one needs `:` is decided at serialization time.
    pub fn new<S: Into<String>>(
        source: Option<&str>,
        command: &str,
        params: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            source: source.map(str::to_string),
            command: command.to_ascii_uppercase(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// The `i`th parameter, if present.
    pub fn arg(&self, i: usize) -> Option<&str> {
        self.params.get(i).map(String::as_str)
    }

    /// Number of parameters.
    pub fn arg_count(&self) -> usize {
        self.params.len()
    }

    fn scan_controls(line: &str) -> Result<(), MessageParseError> {
        for (position, byte) in line.bytes().enumerate() {
            if byte == b'\0' || byte == b'\r' || byte == b'\n' {
                return Err(MessageParseError::IllegalControlChar { byte, position });
            }
        }
        Ok(())
    }
}

impl FromStr for Message {
    type Err = MessageParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        Self::scan_controls(line)?;
        // Only leading padding is stripped: a trailing parameter may
        // legitimately end in spaces.
        let mut rest = line.trim_start_matches(' ');
        if rest.is_empty() {
            return Err(MessageParseError::Empty);
        }

        let source = if let Some(after) = rest.strip_prefix(':') {
            let (src, tail) = after
                .split_once(' ')
                .ok_or(MessageParseError::SourceWithoutCommand)?;
            rest = tail.trim_start_matches(' ');
            Some(src.to_string())
        } else {
            None
        };

        let (command, tail) = match rest.split_once(' ') {
            Some((c, t)) => (c, t.trim_start_matches(' ')),
            None => (rest, ""),
        };
        if command.is_empty() || !command.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(MessageParseError::InvalidCommand(command.to_string()));
        }

        let mut params = Vec::new();
        let mut remaining = tail;
        while !remaining.is_empty() {
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match remaining.split_once(' ') {
                Some((word, tail)) => {
                    params.push(word.to_string());
                    remaining = tail.trim_start_matches(' ');
                }
                None => {
                    params.push(remaining.to_string());
                    break;
                }
            }
        }

        Ok(Message {
            source,
            command: command.to_ascii_uppercase(),
            params,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(src) = &self.source {
            write!(f, ":{} ", src)?;
        }
        f.write_str(&self.command)?;
        let last = self.params.len().checked_sub(1);
        for (i, p) in self.params.iter().enumerate() {
            let needs_colon =
                Some(i) == last && (p.is_empty() || p.starts_with(':') || p.contains(' '));
            if needs_colon {
                write!(f, " :{}", p)?;
            } else {
                write!(f, " {}", p)?;
            }
        }
        Ok(())
    }
}
