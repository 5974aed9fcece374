//! The pool: every server, user, and channel we know about.
//!
//! Cyclic channel/user membership is held as identifier indirection (each
//! side stores the other's key and resolves through the pool) and the
//! [`Network::join_user`] / [`Network::part_user`] helpers keep both edges
//! in step. The pool is owned by the single scheduler task; handlers get
//! an explicit `&mut Network` rather than reaching for globals.

pub mod apply;
pub mod channel;
pub mod server;
pub mod user;

use std::collections::HashMap;

use meshirc_proto::{irc_eq, irc_to_lower, Message, ModeTable, Sid, Uid, UidAllocator};
use tracing::warn;

pub use self::channel::{destroy_maybe, names_lines, Channel, ListEntry, ModeValue, Topic};
pub use self::server::Server;
pub use self::user::User;

/// Source of a state mutation: a user or a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(Uid),
    Server(Sid),
}

impl Actor {
    /// Whether this actor is a server.
    pub fn is_server(&self) -> bool {
        matches!(self, Actor::Server(_))
    }

    /// The user behind the actor, if any.
    pub fn user(&self) -> Option<Uid> {
        match self {
            Actor::User(uid) => Some(*uid),
            Actor::Server(_) => None,
        }
    }
}

/// Process-wide state, reified as a value.
pub struct Network {
    /// Our own SID.
    pub me: Sid,
    servers: HashMap<Sid, Server>,
    users: HashMap<Uid, User>,
    /// Keyed by casefolded name.
    channels: HashMap<String, Channel>,
    /// UID source for locally-introduced users and ephemeral actors.
    pub uid_alloc: UidAllocator,
    /// Numerics and notices queued for locally-attached clients; the
    /// client layer drains this after every scheduler turn.
    pub client_out: Vec<(Uid, Message)>,
    /// Local connections the client layer must close (ban enforcement,
    /// kills), with the quit reason.
    pub client_disconnects: Vec<(Uid, String)>,
}

impl Network {
    /// A pool containing only ourselves.
    pub fn new(me: Sid, name: String) -> Self {
        let mut servers = HashMap::new();
        servers.insert(me, Server::new(me, &name, "", None));
        Self {
            me,
            servers,
            users: HashMap::new(),
            channels: HashMap::new(),
            uid_alloc: UidAllocator::new(me),
            client_out: Vec::new(),
            client_disconnects: Vec::new(),
        }
    }

    // --- servers ---------------------------------------------------------

    /// Our own record.
    pub fn me(&self) -> &Server {
        &self.servers[&self.me]
    }

    /// Our name on the wire.
    pub fn my_name(&self) -> String {
        self.me().name.clone()
    }

    pub fn server(&self, sid: Sid) -> Option<&Server> {
        self.servers.get(&sid)
    }

    pub fn server_mut(&mut self, sid: Sid) -> Option<&mut Server> {
        self.servers.get_mut(&sid)
    }

    /// Insert a server record. Returns `false` (and keeps the old record)
    /// on SID collision.
    pub fn add_server(&mut self, server: Server) -> bool {
        if self.servers.contains_key(&server.sid) {
            return false;
        }
        self.servers.insert(server.sid, server);
        true
    }

    /// Remove a server and every server routed through it. Users behind
    /// them are removed from the pool and all channels. Returns affected
    /// channel names (deduplicated) for destroy checks.
    pub fn remove_server(&mut self, sid: Sid) -> Vec<String> {
        let mut doomed = vec![sid];
        loop {
            let more: Vec<Sid> = self
                .servers
                .values()
                .filter(|s| {
                    s.location.is_some_and(|via| doomed.contains(&via))
                        && !doomed.contains(&s.sid)
                })
                .map(|s| s.sid)
                .collect();
            if more.is_empty() {
                break;
            }
            doomed.extend(more);
        }

        let gone_users: Vec<Uid> = self
            .users
            .values()
            .filter(|u| doomed.contains(&u.server))
            .map(|u| u.uid)
            .collect();
        let mut touched = Vec::new();
        for uid in gone_users {
            for chan in self.remove_user(uid) {
                if !touched.contains(&chan) {
                    touched.push(chan);
                }
            }
        }
        for sid in doomed {
            if sid != self.me {
                self.servers.remove(&sid);
            }
        }
        touched
    }

    /// All servers, ourselves included.
    pub fn servers(&self) -> impl Iterator<Item = &Server> {
        self.servers.values()
    }

    /// Local mode perspective.
    pub fn table(&self) -> &ModeTable {
        &self.me().table
    }

    /// Mode perspective of `sid`, falling back to ours for unknown peers.
    pub fn perspective(&self, sid: Sid) -> &ModeTable {
        self.servers
            .get(&sid)
            .map(|s| &s.table)
            .unwrap_or_else(|| self.table())
    }

    // --- users -----------------------------------------------------------

    pub fn user(&self, uid: Uid) -> Option<&User> {
        self.users.get(&uid)
    }

    pub fn user_mut(&mut self, uid: Uid) -> Option<&mut User> {
        self.users.get_mut(&uid)
    }

    /// Insert a user record. Returns `false` on UID collision.
    pub fn add_user(&mut self, user: User) -> bool {
        if self.users.contains_key(&user.uid) {
            return false;
        }
        self.users.insert(user.uid, user);
        true
    }

    /// Find a user by nickname.
    pub fn user_by_nick(&self, nick: &str) -> Option<&User> {
        self.users.values().find(|u| irc_eq(&u.nick, nick))
    }

    /// All users.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// Remove a user from the pool and from every channel, returning the
    /// channels they were in.
    pub fn remove_user(&mut self, uid: Uid) -> Vec<String> {
        let Some(user) = self.users.remove(&uid) else {
            return Vec::new();
        };
        for chan in &user.channels {
            if let Some(channel) = self.channels.get_mut(&irc_to_lower(chan)) {
                channel.remove(uid);
            }
        }
        user.channels
    }

    // --- channels --------------------------------------------------------

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&irc_to_lower(name))
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(&irc_to_lower(name))
    }

    /// Look up a channel, creating it with timestamp `time` if absent.
    /// Returns whether it was created.
    pub fn channel_or_create(&mut self, name: &str, time: i64) -> (&mut Channel, bool) {
        let key = irc_to_lower(name);
        let created = !self.channels.contains_key(&key);
        let chan = self
            .channels
            .entry(key)
            .or_insert_with(|| Channel::new(name, time));
        (chan, created)
    }

    /// Remove a channel record outright. Membership edges must already be
    /// gone; a non-empty channel is refused.
    pub fn drop_channel(&mut self, name: &str) -> bool {
        let key = irc_to_lower(name);
        match self.channels.get(&key) {
            Some(chan) if chan.users.is_empty() => {
                self.channels.remove(&key);
                true
            }
            Some(_) => {
                warn!(channel = %name, "refusing to drop non-empty channel");
                false
            }
            None => false,
        }
    }

    /// All channels.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    // --- membership edges -------------------------------------------------

    /// Join `uid` to `channel`, maintaining both sides of the edge.
    pub fn join_user(&mut self, channel: &str, uid: Uid) -> bool {
        let Some(chan) = self.channel_mut(channel) else {
            return false;
        };
        if !chan.add(uid) {
            return false;
        }
        let name = chan.name.clone();
        let Some(user) = self.users.get_mut(&uid) else {
            // No such user: undo the half-edge rather than leave it dangling.
            if let Some(chan) = self.channel_mut(channel) {
                chan.remove(uid);
            }
            return false;
        };
        if !user.channels.iter().any(|c| irc_eq(c, &name)) {
            user.channels.push(name);
        }
        true
    }

    /// Remove `uid` from `channel`, breaking both edges and purging status
    /// lists.
    pub fn part_user(&mut self, channel: &str, uid: Uid) -> bool {
        let Some(chan) = self.channel_mut(channel) else {
            return false;
        };
        let removed = chan.remove(uid);
        if let Some(user) = self.users.get_mut(&uid) {
            user.channels.retain(|c| !irc_eq(c, channel));
        }
        removed
    }

    // --- misc -------------------------------------------------------------

    /// Displayable form of an actor for set-by fields and notices.
    pub fn actor_display(&self, actor: Actor) -> String {
        match actor {
            Actor::User(uid) => self
                .user(uid)
                .map(|u| u.hostmask())
                .unwrap_or_else(|| uid.to_string()),
            Actor::Server(sid) => self
                .server(sid)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| sid.to_string()),
        }
    }

    /// Wire source token for an actor.
    pub fn actor_id(&self, actor: Actor) -> String {
        match actor {
            Actor::User(uid) => uid.to_string(),
            Actor::Server(sid) => sid.to_string(),
        }
    }

    /// Queue a numeric/notice for a locally-attached user.
    pub fn send_numeric(&mut self, to: Uid, msg: Message) {
        self.client_out.push((to, msg));
    }
}
