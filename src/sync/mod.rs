//! Server-to-server synchronization.
//!
//! Link bookkeeping, the handshake state machine, TS6 frame decoding and
//! encoding, and burst generation. Outbound frames for one peer are queued
//! on an in-order channel that the transport writer drains; within one
//! scheduler turn all resulting fan-out is queued before the next inbound
//! frame is looked at, so no peer observes an intermediate state.

pub mod burst;
pub mod decode;
pub mod encode;
pub mod handshake;

use std::collections::HashMap;

use meshirc_proto::{Message, Sid};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// One established peer link.
#[derive(Debug)]
pub struct Link {
    /// SID of the directly-linked peer.
    pub sid: Sid,
    /// Peer's server name.
    pub name: String,
    /// Link is past burst in our direction.
    pub burst_sent: bool,
    tx: mpsc::UnboundedSender<Message>,
}

impl Link {
    /// Create a link plus the receiving half the transport writer drains.
    pub fn open(sid: Sid, name: &str) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sid,
                name: name.to_string(),
                burst_sent: false,
                tx,
            },
            rx,
        )
    }

    /// Queue a frame for this peer.
    pub fn send(&self, msg: Message) {
        trace!(peer = %self.name, frame = %msg, "queueing frame");
        if self.tx.send(msg).is_err() {
            debug!(peer = %self.name, "link writer gone; dropping frame");
        }
    }
}

/// All established links, keyed by peer SID.
#[derive(Debug, Default)]
pub struct Links {
    by_sid: HashMap<Sid, Link>,
}

impl Links {
    /// No links.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an established link.
    pub fn insert(&mut self, link: Link) {
        self.by_sid.insert(link.sid, link);
    }

    /// Tear down a link's queue. Pool-side cleanup is the caller's job.
    pub fn remove(&mut self, sid: Sid) -> Option<Link> {
        self.by_sid.remove(&sid)
    }

    /// Link to a directly-connected peer.
    pub fn get(&self, sid: Sid) -> Option<&Link> {
        self.by_sid.get(&sid)
    }

    /// Mutable link access.
    pub fn get_mut(&mut self, sid: Sid) -> Option<&mut Link> {
        self.by_sid.get_mut(&sid)
    }

    /// Queue a frame for one peer.
    pub fn send(&self, sid: Sid, msg: Message) {
        if let Some(link) = self.by_sid.get(&sid) {
            link.send(msg);
        }
    }

    /// Queue a frame for every bursted peer except `except`; this is the
    /// fan-out primitive behind forwarding. The source peer never gets its own
    /// frame back.
    pub fn broadcast(&self, except: Option<Sid>, msg: &Message) {
        for link in self.by_sid.values() {
            if Some(link.sid) == except || !link.burst_sent {
                continue;
            }
            link.send(msg.clone());
        }
    }

    /// Established links.
    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.by_sid.values()
    }
}
