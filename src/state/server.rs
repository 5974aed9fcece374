//! Server records and per-peer bookkeeping.

use std::collections::HashSet;

use meshirc_proto::{ModeTable, Sid};

/// A server on the mesh: ourselves, a directly-linked peer, or a server
/// learned through one.
#[derive(Debug)]
pub struct Server {
    pub sid: Sid,
    pub name: String,
    pub description: String,
    /// Capability tokens the peer advertised at link time (`KLN`, `BAN`,
    /// `EUID`, ...). Empty for servers behind a peer; capability decisions
    /// are made against the direct link.
    pub caps: HashSet<String>,
    /// Still inside its initial burst toward us.
    pub is_burst: bool,
    /// Whether we have already sent this peer our ban burst.
    pub bans_negotiated: bool,
    /// Direct neighbor this server is routed through; `None` for
    /// ourselves. Directly-linked peers point at themselves.
    pub location: Option<Sid>,
    /// This server's view of mode letter bindings.
    pub table: ModeTable,
    /// Protocol-violation kinds already reported for this peer, to keep
    /// one misbehaving link from flooding the operator channel.
    noticed: HashSet<&'static str>,
}

impl Server {
    /// A fresh record with the conventional mode bindings.
    pub fn new(sid: Sid, name: &str, description: &str, location: Option<Sid>) -> Self {
        Self {
            sid,
            name: name.to_string(),
            description: description.to_string(),
            caps: HashSet::new(),
            is_burst: false,
            bans_negotiated: false,
            location,
            table: ModeTable::standard(),
            noticed: HashSet::new(),
        }
    }

    /// Whether the peer advertised a capability token.
    pub fn has_cap(&self, cap: &str) -> bool {
        self.caps.contains(cap)
    }

    /// Record a violation kind; returns `true` the first time it is seen,
    /// after which the caller should stay quiet about it.
    pub fn notice_once(&mut self, kind: &'static str) -> bool {
        self.noticed.insert(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_lookup() {
        let mut s = Server::new(Sid(2), "leaf.example.net", "Leaf", Some(Sid(2)));
        assert!(!s.has_cap("BAN"));
        s.caps.insert("BAN".into());
        assert!(s.has_cap("BAN"));
    }

    #[test]
    fn notices_deduplicate_per_kind() {
        let mut s = Server::new(Sid(2), "leaf.example.net", "Leaf", Some(Sid(2)));
        assert!(s.notice_once("euid.args"));
        assert!(!s.notice_once("euid.args"));
        assert!(s.notice_once("sjoin.ts"));
    }
}
