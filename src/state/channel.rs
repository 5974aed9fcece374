//! Channel state: timestamp, members, modes, lists, topic.
//!
//! All mutation funnels through the primitives here (and the mode
//! applicator built on them); nothing writes channel fields straight from
//! the wire. Member order is preserved because NAMES and SJOIN output must
//! be deterministic.

use std::collections::HashMap;

use meshirc_proto::{irc_eq, wildcard_match, ModeChange, ModeLine, ModeTable, Sid, Uid};

use crate::event::{names, EventArgs, EventBus};
use crate::state::Network;

/// Payload width available for nicks on one NAMES reply line.
pub const NAMES_LINE_WIDTH: usize = 500;

/// An entry in a list mode (ban, except, invite_except, access).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub param: String,
    pub set_by: String,
    pub set_at: i64,
}

/// Channel topic with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: i64,
    /// Server the topic came to us from.
    pub source: Sid,
}

/// Stored value of one channel mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeValue {
    /// Flag mode.
    Simple { time: i64 },
    /// Parameterized mode (limit, forward, key).
    Param { param: String, time: i64 },
    /// Mask list.
    List { entries: Vec<ListEntry> },
    /// Status holders, in grant order.
    Status { users: Vec<Uid> },
}

/// One channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Display name (case-preserved).
    pub name: String,
    /// Creation timestamp; the mesh-wide tiebreaker.
    pub time: i64,
    /// Members in join order.
    pub users: Vec<Uid>,
    /// Mode name → value.
    pub modes: HashMap<String, ModeValue>,
    /// Current topic, absent iff the text is empty.
    pub topic: Option<Topic>,
}

impl Channel {
    /// A fresh channel created at `time`.
    pub fn new(name: &str, time: i64) -> Self {
        Self {
            name: name.to_string(),
            time,
            users: Vec::new(),
            modes: HashMap::new(),
            topic: None,
        }
    }

    // --- membership ------------------------------------------------------

    /// Whether `uid` is a member.
    pub fn is_member(&self, uid: Uid) -> bool {
        self.users.contains(&uid)
    }

    /// Add a member. Returns `false` when already present.
    pub fn add(&mut self, uid: Uid) -> bool {
        if self.is_member(uid) {
            return false;
        }
        self.users.push(uid);
        true
    }

    /// Remove a member and purge them from every status list in the same
    /// step, so status lists never reference a non-member.
    pub fn remove(&mut self, uid: Uid) -> bool {
        let before = self.users.len();
        self.users.retain(|&u| u != uid);
        if self.users.len() == before {
            return false;
        }
        self.modes.retain(|_, value| {
            if let ModeValue::Status { users } = value {
                users.retain(|&u| u != uid);
                !users.is_empty()
            } else {
                true
            }
        });
        true
    }

    // --- simple and parameter modes --------------------------------------

    /// Set a flag mode.
    pub fn set_simple(&mut self, name: &str, time: i64) {
        self.modes
            .insert(name.to_string(), ModeValue::Simple { time });
    }

    /// Set a parameterized mode, replacing any previous parameter.
    pub fn set_param(&mut self, name: &str, param: &str, time: i64) {
        self.modes.insert(
            name.to_string(),
            ModeValue::Param {
                param: param.to_string(),
                time,
            },
        );
    }

    /// Unset any non-list, non-status mode.
    pub fn unset_mode(&mut self, name: &str) -> bool {
        match self.modes.get(name) {
            Some(ModeValue::Simple { .. }) | Some(ModeValue::Param { .. }) => {
                self.modes.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Whether a flag/parameter mode is set.
    pub fn has_mode(&self, name: &str) -> bool {
        matches!(
            self.modes.get(name),
            Some(ModeValue::Simple { .. }) | Some(ModeValue::Param { .. })
        )
    }

    /// Parameter of a parameterized mode.
    pub fn mode_param(&self, name: &str) -> Option<&str> {
        match self.modes.get(name) {
            Some(ModeValue::Param { param, .. }) => Some(param),
            _ => None,
        }
    }

    // --- list modes -------------------------------------------------------

    /// Add a list entry. Entries are unique by param under the IRC case
    /// mapping; the list is capped at `max_entries`.
    pub fn add_to_list(&mut self, name: &str, entry: ListEntry, max_entries: usize) -> bool {
        let value = self
            .modes
            .entry(name.to_string())
            .or_insert_with(|| ModeValue::List {
                entries: Vec::new(),
            });
        let ModeValue::List { entries } = value else {
            return false;
        };
        if entries.len() >= max_entries {
            return false;
        }
        if entries.iter().any(|e| irc_eq(&e.param, &entry.param)) {
            return false;
        }
        entries.push(entry);
        true
    }

    /// Remove a list entry by param. Empty lists are dropped from the mode
    /// map entirely.
    pub fn remove_from_list(&mut self, name: &str, param: &str) -> bool {
        let Some(ModeValue::List { entries }) = self.modes.get_mut(name) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| !irc_eq(&e.param, param));
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.modes.remove(name);
        }
        removed
    }

    /// Whether the list holds an entry equal to `param`.
    pub fn list_has(&self, name: &str, param: &str) -> bool {
        match self.modes.get(name) {
            Some(ModeValue::List { entries }) => {
                entries.iter().any(|e| irc_eq(&e.param, param))
            }
            _ => false,
        }
    }

    /// Whether any entry of the list globs `target`.
    pub fn list_matches(&self, name: &str, target: &str) -> bool {
        match self.modes.get(name) {
            Some(ModeValue::List { entries }) => {
                entries.iter().any(|e| wildcard_match(&e.param, target))
            }
            _ => false,
        }
    }

    /// Entries of a list mode, in insertion order.
    pub fn list_entries(&self, name: &str) -> &[ListEntry] {
        match self.modes.get(name) {
            Some(ModeValue::List { entries }) => entries,
            _ => &[],
        }
    }

    /// Target status names granted to `mask` by the access list, whose
    /// entries are `status:mask` pairs. Automatic application on join is a
    /// future feature; this is the lookup it will use.
    pub fn access_matching(&self, mask: &str) -> Vec<String> {
        self.list_entries("access")
            .iter()
            .filter_map(|e| {
                let (status, pattern) = e.param.split_once(':')?;
                wildcard_match(pattern, mask).then(|| status.to_string())
            })
            .collect()
    }

    // --- status modes -----------------------------------------------------

    /// Grant a status to a member. Refused for non-members, keeping the
    /// status⊆members invariant at the primitive level.
    pub fn add_status(&mut self, name: &str, uid: Uid) -> bool {
        if !self.is_member(uid) {
            return false;
        }
        let value = self
            .modes
            .entry(name.to_string())
            .or_insert_with(|| ModeValue::Status { users: Vec::new() });
        let ModeValue::Status { users } = value else {
            return false;
        };
        if users.contains(&uid) {
            return false;
        }
        users.push(uid);
        true
    }

    /// Revoke a status. Empty holder sets are dropped from the mode map.
    pub fn remove_status(&mut self, name: &str, uid: Uid) -> bool {
        let Some(ModeValue::Status { users }) = self.modes.get_mut(name) else {
            return false;
        };
        let before = users.len();
        users.retain(|&u| u != uid);
        let removed = users.len() != before;
        if users.is_empty() {
            self.modes.remove(name);
        }
        removed
    }

    /// Whether `uid` holds `name`.
    pub fn has_status(&self, name: &str, uid: Uid) -> bool {
        matches!(self.modes.get(name), Some(ModeValue::Status { users }) if users.contains(&uid))
    }

    /// Status names held by `uid`, highest level first.
    pub fn status_names_of(&self, table: &ModeTable, uid: Uid) -> Vec<String> {
        table
            .status_names_desc()
            .into_iter()
            .filter(|name| self.has_status(name, uid))
            .map(str::to_string)
            .collect()
    }

    /// Highest status level `uid` holds, or 0.
    pub fn highest_level(&self, table: &ModeTable, uid: Uid) -> i8 {
        self.status_names_of(table, uid)
            .first()
            .and_then(|n| table.level_of(n))
            .unwrap_or(0)
    }

    // --- timestamps and topic --------------------------------------------

    /// Lower the channel timestamp to `min(current, t)`; never raises it.
    ///
    /// Unless `ignore_modes`, a reset also wipes all simple/parameter
    /// modes, statuses, and the topic, returning the unset changes so the
    /// caller can propagate the reversal. SJOIN passes `ignore_modes`
    /// because it computes its own diff.
    pub fn take_lower_time(&mut self, t: i64, ignore_modes: bool) -> Vec<ModeChange> {
        if t >= self.time {
            return Vec::new();
        }
        self.time = t;
        if ignore_modes {
            return Vec::new();
        }
        let mut undone = Vec::new();
        let names: Vec<String> = self.modes.keys().cloned().collect();
        for name in names {
            let wiped = match self.modes.get(&name) {
                Some(ModeValue::List { .. }) | None => continue,
                _ => self.modes.remove(&name),
            };
            match wiped {
                Some(ModeValue::Simple { .. }) => {
                    undone.push(ModeChange::new(false, &name, None));
                }
                Some(ModeValue::Param { param, .. }) => {
                    undone.push(ModeChange::new(false, &name, Some(&param)));
                }
                Some(ModeValue::Status { users }) => {
                    for uid in users {
                        undone.push(ModeChange::new(false, &name, Some(&uid.to_string())));
                    }
                }
                _ => {}
            }
        }
        self.topic = None;
        undone
    }

    /// Replace the topic. An empty text clears the record entirely.
    pub fn do_topic(&mut self, text: &str, set_by: &str, set_at: i64, source: Sid) {
        if text.is_empty() {
            self.topic = None;
        } else {
            self.topic = Some(Topic {
                text: text.to_string(),
                set_by: set_by.to_string(),
                set_at,
                source,
            });
        }
    }

    // --- snapshots for SJOIN and burst ------------------------------------

    /// Current simple/parameter/key modes as set-changes (status and list
    /// modes excluded).
    pub fn simple_changes(&self, table: &ModeTable) -> Vec<ModeChange> {
        let mut out: Vec<ModeChange> = self
            .modes
            .iter()
            .filter_map(|(name, value)| match value {
                ModeValue::Simple { .. } => Some(ModeChange::new(true, name, None)),
                ModeValue::Param { param, .. } => {
                    Some(ModeChange::new(true, name, Some(param)))
                }
                _ => None,
            })
            .collect();
        // HashMap iteration order is arbitrary; emit deterministically.
        out.sort_by(|a, b| {
            let la = table.letter_of(&a.name).unwrap_or('~');
            let lb = table.letter_of(&b.name).unwrap_or('~');
            la.cmp(&lb)
        });
        out
    }

    /// Current statuses as set-changes with UID parameters.
    pub fn status_changes(&self, table: &ModeTable) -> Vec<ModeChange> {
        let mut out = Vec::new();
        for name in table.status_names_desc() {
            if let Some(ModeValue::Status { users }) = self.modes.get(name) {
                for uid in users {
                    out.push(ModeChange::new(true, name, Some(&uid.to_string())));
                }
            }
        }
        out
    }

    /// Simple-mode string for SJOIN advertisement.
    pub fn mode_line(&self, table: &ModeTable) -> ModeLine {
        let changes = self.simple_changes(table);
        table
            .strings_from_changes(&changes, 0, true)
            .into_iter()
            .next()
            .unwrap_or(ModeLine {
                modes: "+".to_string(),
                params: Vec::new(),
            })
    }

    /// SJOIN member token for `uid` under `table`'s prefixes.
    pub fn burst_token(&self, table: &ModeTable, uid: Uid) -> String {
        let mut token = String::new();
        for name in self.status_names_of(table, uid) {
            if let Some(prefix) = table.prefix_of(&name) {
                token.push(prefix);
            }
        }
        token.push_str(&uid.to_string());
        token
    }
}

/// Destroy `channel` iff it has no members and no listener vetoes.
pub fn destroy_maybe(net: &mut Network, bus: &EventBus, channel: &str) -> bool {
    let Some(chan) = net.channel(channel) else {
        return false;
    };
    if !chan.users.is_empty() {
        return false;
    }
    let name = chan.name.clone();
    if !bus
        .fire(net, names::CAN_DESTROY, &EventArgs::channel(&name))
        .allowed()
    {
        return false;
    }
    net.drop_channel(&name);
    true
}

/// NAMES reply payloads for `channel`: prefix-decorated nicks grouped into
/// lines of at most [`NAMES_LINE_WIDTH`] characters.
///
/// With `multi_prefix` every held prefix is shown in descending level
/// order; otherwise only the highest.
pub fn names_lines(
    net: &mut Network,
    bus: &EventBus,
    channel: &str,
    multi_prefix: bool,
) -> Vec<String> {
    let Some(chan) = net.channel(channel) else {
        return Vec::new();
    };
    let name = chan.name.clone();
    let members = chan.users.clone();

    let mut tokens = Vec::new();
    for uid in members {
        let args = EventArgs::member(&name, uid);
        if !bus.fire(net, names::SHOW_IN_NAMES, &args).allowed() {
            continue;
        }
        bus.fire(net, names::NAMES_CHARACTER, &args);

        let Some(chan) = net.channel(&name) else {
            break;
        };
        let Some(user) = net.user(uid) else {
            continue;
        };
        let statuses = chan.status_names_of(net.table(), uid);
        let mut token = String::new();
        for status in &statuses {
            if let Some(prefix) = net.table().prefix_of(status) {
                token.push(prefix);
                if !multi_prefix {
                    break;
                }
            }
        }
        token.push_str(&user.nick);
        tokens.push(token);
    }

    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for token in tokens {
        if !current.is_empty() && current.len() + 1 + token.len() > NAMES_LINE_WIDTH {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&token);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshirc_proto::ModeTable;

    fn uid(s: &str) -> Uid {
        Uid::from_ts6(s).unwrap()
    }

    #[test]
    fn membership_and_status_purge_are_atomic() {
        let mut chan = Channel::new("#ops", 1000);
        let a = uid("001AAAAAA");
        let b = uid("001AAAAAB");
        assert!(chan.add(a));
        assert!(chan.add(b));
        assert!(!chan.add(a));
        assert!(chan.add_status("op", a));
        assert!(chan.add_status("voice", a));
        assert!(chan.add_status("op", b));

        assert!(chan.remove(a));
        assert!(!chan.has_status("op", a));
        assert!(!chan.has_status("voice", a));
        assert!(chan.has_status("op", b));
        assert!(!chan.remove(a));
    }

    #[test]
    fn status_requires_membership() {
        let mut chan = Channel::new("#ops", 1000);
        assert!(!chan.add_status("op", uid("001AAAAAA")));
    }

    #[test]
    fn list_entries_unique_by_param() {
        let mut chan = Channel::new("#x", 0);
        let entry = |p: &str| ListEntry {
            param: p.into(),
            set_by: "ann".into(),
            set_at: 5,
        };
        assert!(chan.add_to_list("ban", entry("*!*@bad"), 100));
        assert!(!chan.add_to_list("ban", entry("*!*@BAD"), 100));
        assert!(chan.list_has("ban", "*!*@bad"));
        assert!(chan.list_matches("ban", "n!u@bad"));
        assert!(!chan.list_matches("ban", "n!u@good"));
        assert!(chan.remove_from_list("ban", "*!*@Bad"));
        assert!(!chan.list_has("ban", "*!*@bad"));
    }

    #[test]
    fn list_cap_is_enforced() {
        let mut chan = Channel::new("#x", 0);
        for i in 0..3 {
            assert!(chan.add_to_list(
                "ban",
                ListEntry {
                    param: format!("m{}!*@*", i),
                    set_by: "s".into(),
                    set_at: 0,
                },
                3
            ));
        }
        assert!(!chan.add_to_list(
            "ban",
            ListEntry {
                param: "overflow!*@*".into(),
                set_by: "s".into(),
                set_at: 0,
            },
            3
        ));
    }

    #[test]
    fn access_list_lookup() {
        let mut chan = Channel::new("#x", 0);
        chan.add_to_list(
            "access",
            ListEntry {
                param: "op:*!*@trusted/*".into(),
                set_by: "s".into(),
                set_at: 0,
            },
            100,
        );
        assert_eq!(chan.access_matching("ann!a@trusted/ann"), vec!["op"]);
        assert!(chan.access_matching("bob!b@elsewhere").is_empty());
    }

    #[test]
    fn take_lower_time_is_monotone() {
        let mut chan = Channel::new("#x", 1000);
        assert!(chan.take_lower_time(1500, true).is_empty());
        assert_eq!(chan.time, 1000);
        chan.take_lower_time(900, true);
        assert_eq!(chan.time, 900);
        chan.take_lower_time(900, true);
        assert_eq!(chan.time, 900);
    }

    #[test]
    fn take_lower_time_wipe_reports_undone_modes() {
        let mut chan = Channel::new("#x", 1000);
        let a = uid("001AAAAAA");
        chan.add(a);
        chan.set_simple("moderated", 1000);
        chan.set_param("limit", "5", 1000);
        chan.add_status("op", a);
        chan.do_topic("hi", "ann", 1000, Sid(1));

        let undone = chan.take_lower_time(500, false);
        assert_eq!(chan.time, 500);
        assert!(chan.modes.is_empty());
        assert!(chan.topic.is_none());
        assert_eq!(undone.len(), 3);
        assert!(undone.iter().all(|c| !c.set));
        // Members stay; only privileges and modes reset.
        assert!(chan.is_member(a));
    }

    #[test]
    fn topic_clears_on_empty_text() {
        let mut chan = Channel::new("#x", 0);
        chan.do_topic("words", "ann", 10, Sid(1));
        assert!(chan.topic.is_some());
        chan.do_topic("", "ann", 11, Sid(1));
        assert!(chan.topic.is_none());
    }

    #[test]
    fn burst_token_carries_prefixes_in_level_order() {
        let table = ModeTable::standard();
        let mut chan = Channel::new("#x", 0);
        let a = uid("001AAAAAA");
        chan.add(a);
        chan.add_status("voice", a);
        chan.add_status("op", a);
        assert_eq!(chan.burst_token(&table, a), "@+001AAAAAA");
    }

    #[test]
    fn mode_line_orders_by_letter() {
        let table = ModeTable::standard();
        let mut chan = Channel::new("#x", 0);
        chan.set_simple("topic_lock", 0);
        chan.set_simple("no_ext", 0);
        chan.set_param("limit", "10", 0);
        let line = chan.mode_line(&table);
        assert_eq!(line.modes, "+lnt");
        assert_eq!(line.params, vec!["10"]);
    }
}
