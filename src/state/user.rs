//! User records.

use std::collections::HashSet;

use meshirc_proto::{Sid, Uid};

/// A user known to the mesh, local or remote.
///
/// `server` is the origin server; `location` is the directly-linked
/// neighbor through which frames about this user reach us. For users on a
/// directly-linked peer the two coincide.
#[derive(Debug, Clone)]
pub struct User {
    pub uid: Uid,
    pub nick: String,
    pub ident: String,
    /// Real hostname.
    pub host: String,
    /// Visible (cloaked) hostname shown on the wire.
    pub cloak: String,
    /// Textual IP address.
    pub ip: String,
    /// Real name (gecos).
    pub real: String,
    /// Timestamp of the current nickname, advertised on EUID.
    pub nick_time: i64,
    /// Services account, if identified.
    pub account: Option<String>,
    /// User mode names.
    pub modes: HashSet<String>,
    /// Origin server.
    pub server: Sid,
    /// Direct neighbor this user is routed through.
    pub location: Sid,
    /// Channels this user is in, in join order (lowercase names).
    pub channels: Vec<String>,
}

impl User {
    /// `ident@host` tuple, matched by K-lines.
    pub fn user_host(&self) -> String {
        format!("{}@{}", self.ident, self.host)
    }

    /// `ident@ip` tuple, the K-line fallback target.
    pub fn user_ip(&self) -> String {
        format!("{}@{}", self.ident, self.ip)
    }

    /// Full source mask as peers see it.
    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.ident, self.cloak)
    }

    /// Whether this user is attached to `me` rather than learned over a
    /// link.
    pub fn is_local(&self, me: Sid) -> bool {
        self.server == me
    }
}
