//! Synchronous named-event dispatch.
//!
//! Engine components announce state transitions by firing named events;
//! listeners run in registration order on the scheduler thread and may
//! stop propagation, which both short-circuits later listeners and acts
//! as a veto for `can_*` events (channel destruction, NAMES visibility).

use std::collections::HashMap;

use meshirc_proto::{Sid, Uid};

use crate::state::Network;

/// Well-known event names fired by the engine.
pub mod names {
    /// A peer link is about to receive its TS6 state burst.
    pub const SERVER_SEND_TS6_BURST: &str = "server.send_ts6_burst";
    /// A peer link is about to receive its state burst (any protocol).
    pub const SERVER_SEND_BURST: &str = "server.send_burst";
    /// A user record entered the pool.
    pub const USER_NEW: &str = "user.new";
    /// A user was added to a channel's member list.
    pub const USER_JOINED: &str = "user_joined";
    /// Query: may this user message that target?
    pub const USER_CAN_MESSAGE: &str = "user.can_message";
    /// A channel was advertised during burst.
    pub const CHANNEL_BURST: &str = "channel_burst";
    /// A local join reached channel state.
    pub const CHANNEL_JOIN: &str = "channel_join";
    /// A user left a channel.
    pub const CHANNEL_PART: &str = "channel_part";
    /// A user was kicked from a channel.
    pub const CHANNEL_KICK: &str = "channel_kick";
    /// Query: should this member appear in NAMES output?
    pub const SHOW_IN_NAMES: &str = "show_in_names";
    /// A NAMES prefix character is being chosen for a member.
    pub const NAMES_CHARACTER: &str = "names_character";
    /// Query: may this empty channel be destroyed?
    pub const CAN_DESTROY: &str = "can_destroy";
}

/// Listener verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the remaining listeners.
    Continue,
    /// Stop here; for `can_*` events this is a veto.
    Stop,
}

/// Context handed to every listener. Fields are filled per event; absent
/// ones are `None`.
#[derive(Debug, Default, Clone)]
pub struct EventArgs<'a> {
    /// Channel name, for channel-scoped events.
    pub channel: Option<&'a str>,
    /// Primary user.
    pub user: Option<Uid>,
    /// Secondary user (kick target, message recipient).
    pub target: Option<Uid>,
    /// Server, for link-scoped events.
    pub server: Option<Sid>,
    /// Free-form payload (reason, message text).
    pub text: Option<&'a str>,
}

impl<'a> EventArgs<'a> {
    /// Args for a channel-scoped event about one user.
    pub fn member(channel: &'a str, user: Uid) -> Self {
        Self {
            channel: Some(channel),
            user: Some(user),
            ..Self::default()
        }
    }

    /// Args for a channel-only event.
    pub fn channel(channel: &'a str) -> Self {
        Self {
            channel: Some(channel),
            ..Self::default()
        }
    }

    /// Args for a link-scoped event.
    pub fn server(server: Sid) -> Self {
        Self {
            server: Some(server),
            ..Self::default()
        }
    }
}

/// Boxed listener. Listeners get the pool so they can inspect and mutate
/// state; the bus itself is held outside the pool to keep borrows disjoint.
pub type Listener = Box<dyn Fn(&mut Network, &EventArgs) -> Flow>;

/// Result of firing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    /// How many listeners ran.
    pub ran: usize,
    /// Whether a listener stopped propagation.
    pub stopped: bool,
}

impl Fired {
    /// `true` when no listener vetoed.
    pub fn allowed(&self) -> bool {
        !self.stopped
    }
}

/// Registry of ordered listeners keyed by event name.
#[derive(Default)]
pub struct EventBus {
    table: HashMap<&'static str, Vec<Listener>>,
}

impl EventBus {
    /// An empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for `name`. Listeners fire in registration order.
    pub fn on(&mut self, name: &'static str, listener: Listener) {
        self.table.entry(name).or_default().push(listener);
    }

    /// Fire `name`, running listeners until one stops propagation.
    pub fn fire(&self, net: &mut Network, name: &str, args: &EventArgs) -> Fired {
        let mut fired = Fired {
            ran: 0,
            stopped: false,
        };
        if let Some(listeners) = self.table.get(name) {
            for listener in listeners {
                fired.ran += 1;
                if listener(net, args) == Flow::Stop {
                    fired.stopped = true;
                    break;
                }
            }
        }
        fired
    }
}
