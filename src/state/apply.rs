//! The transactional mode applicator.
//!
//! Takes a flat run of `(±name, param?)` requests from any actor, runs
//! each through its mode block, commits the survivors to channel state,
//! and returns the committed diff. Nothing here touches the wire; callers
//! decide whether and where the diff propagates.

use std::collections::HashMap;

use meshirc_proto::util::clean_param;
use meshirc_proto::{ModeChange, ModeKind, Uid};
use tracing::debug;

use crate::config::LimitsConfig;
use crate::replies;
use crate::state::{Actor, ListEntry, Network};

/// Minimum status level ("basic status") required to change simple modes:
/// halfop.
pub const BASIC_STATUS_LEVEL: i8 = 2;

/// The record a mode block receives. Blocks may veto (return `false`),
/// rewrite the parameter, resolve a status target, accumulate output
/// params, or shape the no-privileges reply.
pub struct ModeFire<'a> {
    /// Channel the run is against.
    pub channel: &'a str,
    /// Requesting actor.
    pub source: Actor,
    /// `true` = setting, `false` = unsetting.
    pub state: bool,
    /// Mode name under the local perspective.
    pub name: String,
    /// Cleaned parameter, if the change carries one.
    pub param: Option<String>,
    /// Output parameters accumulated across the whole run.
    pub params: &'a mut Vec<String>,
    /// Permission bypass (remote and SJOIN-derived changes).
    pub force: bool,
    /// Identifiers are UIDs rather than nicknames.
    pub protocol: bool,
    /// Source may change simple modes: forced, a server, or holding at
    /// least [`BASIC_STATUS_LEVEL`].
    pub has_basic_status: bool,
    /// Resolved status target, filled by status blocks.
    pub target: Option<Uid>,
    /// Discard the change without an error.
    pub do_not_set: bool,
    /// Custom no-privileges reply text.
    pub send_no_privs: Option<String>,
    /// Suppress the no-privileges numeric entirely.
    pub hide_no_privs: bool,
}

/// A mode block: per-mode policy fired before the change commits.
pub type ModeBlock = Box<dyn Fn(&mut Network, &mut ModeFire) -> bool>;

/// Registry of mode blocks keyed by mode name. Blocks for one name fire
/// in registration order; the first refusal wins.
#[derive(Default)]
pub struct ModeBlocks {
    map: HashMap<String, Vec<ModeBlock>>,
}

impl ModeBlocks {
    /// An empty registry: every change is allowed (used with `force`-only
    /// paths and in tests).
    pub fn new() -> Self {
        Self::default()
    }

    /// The permission policy for the conventional mode set.
    pub fn standard() -> Self {
        let mut blocks = Self::new();
        for name in [
            "ban",
            "except",
            "invite_except",
            "access",
            "no_ext",
            "topic_lock",
            "moderated",
            "invite_only",
            "secret",
            "private",
            "limit",
            "forward",
            "key",
        ] {
            blocks.on(name, Box::new(|_net, fire| fire.force || fire.has_basic_status));
        }
        for name in ["owner", "admin", "op", "halfop", "voice"] {
            blocks.on(name, Box::new(status_block));
        }
        blocks
    }

    /// Append a block for `name`.
    pub fn on(&mut self, name: &str, block: ModeBlock) {
        self.map.entry(name.to_string()).or_default().push(block);
    }

    fn fire(&self, net: &mut Network, fire: &mut ModeFire) -> bool {
        let Some(blocks) = self.map.get(&fire.name) else {
            return true;
        };
        blocks.iter().all(|block| block(net, fire))
    }
}

/// Standard policy for status modes: resolve the target, then apply the
/// grant/demote rules.
fn status_block(net: &mut Network, fire: &mut ModeFire) -> bool {
    let Some(param) = fire.param.clone() else {
        return false;
    };

    let target = if fire.protocol {
        Uid::from_ts6(&param)
            .ok()
            .filter(|uid| net.user(*uid).is_some())
    } else {
        net.user_by_nick(&param).map(|u| u.uid)
    };
    let Some(target) = target else {
        notify_local_source(net, fire.source, |net, nick| {
            replies::no_such_nick(&net.my_name(), nick, &param)
        });
        fire.hide_no_privs = true;
        return false;
    };

    let is_member = net
        .channel(fire.channel)
        .is_some_and(|c| c.is_member(target));
    if !is_member {
        let channel = fire.channel.to_string();
        notify_local_source(net, fire.source, |net, nick| {
            replies::user_not_in_channel(&net.my_name(), nick, &param, &channel)
        });
        fire.hide_no_privs = true;
        return false;
    }

    if !fire.force {
        if !fire.has_basic_status {
            return false;
        }
        if let Actor::User(src) = fire.source {
            if !fire.state && src != target {
                let outranks = net.channel(fire.channel).is_some_and(|c| {
                    c.highest_level(net.table(), src) > c.highest_level(net.table(), target)
                });
                if !outranks {
                    fire.send_no_privs = Some("Their status is not below yours".to_string());
                    return false;
                }
            }
        }
    }

    fire.target = Some(target);
    fire.param = Some(target.to_string());
    true
}

/// Queue a reply to `source` iff it is a locally-attached user.
fn notify_local_source<F>(net: &mut Network, source: Actor, build: F)
where
    F: FnOnce(&Network, &str) -> meshirc_proto::Message,
{
    let Actor::User(uid) = source else {
        return;
    };
    let Some(user) = net.user(uid) else {
        return;
    };
    if !user.is_local(net.me) {
        return;
    }
    let nick = user.nick.clone();
    let msg = build(net, &nick);
    net.send_numeric(uid, msg);
}

/// Apply a run of mode requests to `channel` and return the committed
/// change log.
///
/// `requests` names may carry a `+`/`-` prefix (default `+`). With
/// `force`, permission checks are bypassed (remote changes, SJOIN
/// results). With `protocol`, status parameters are UIDs, not nicknames.
#[allow(clippy::too_many_arguments)]
pub fn apply_modes(
    net: &mut Network,
    blocks: &ModeBlocks,
    limits: &LimitsConfig,
    channel: &str,
    source: Actor,
    requests: &[(String, Option<String>)],
    force: bool,
    protocol: bool,
    now: i64,
) -> Vec<ModeChange> {
    let mut log: Vec<ModeChange> = Vec::new();
    let mut run_params: Vec<String> = Vec::new();

    if net.channel(channel).is_none() {
        return log;
    }

    for (raw_name, raw_param) in requests {
        // 1. Direction and name.
        let (state, name) = match raw_name.strip_prefix('-') {
            Some(rest) => (false, rest),
            None => (true, raw_name.strip_prefix('+').unwrap_or(raw_name)),
        };
        let Some(kind) = net.table().kind_of(name) else {
            debug!(mode = %name, channel = %channel, "skipping unknown mode name");
            continue;
        };

        // 2–3. Parameter requirements and hygiene.
        let mut param: Option<String> = None;
        if kind.wants_param(state) {
            match raw_param {
                Some(raw) => {
                    let max = if kind == ModeKind::List {
                        limits.max_ban_length
                    } else {
                        limits.max_param_length
                    };
                    match clean_param(raw, max) {
                        Some(clean) => param = Some(clean),
                        None => continue,
                    }
                }
                None => {
                    if kind.requires_param(state) {
                        continue;
                    }
                    if kind == ModeKind::List {
                        // Parameterless list change is a view, not a mutation.
                        continue;
                    }
                }
            }
        }

        // 4. Fire the mode block.
        let has_basic_status = force
            || source.is_server()
            || source.user().is_some_and(|uid| {
                net.channel(channel)
                    .is_some_and(|c| c.highest_level(net.table(), uid) >= BASIC_STATUS_LEVEL)
            });
        let mut fire = ModeFire {
            channel,
            source,
            state,
            name: name.to_string(),
            param,
            params: &mut run_params,
            force,
            protocol,
            has_basic_status,
            target: None,
            do_not_set: false,
            send_no_privs: None,
            hide_no_privs: false,
        };
        let won = blocks.fire(net, &mut fire);

        // 5. The no-privileges policy for refused changes.
        if !won {
            let hide = fire.hide_no_privs;
            let custom = fire.send_no_privs.clone();
            let had_basic = fire.has_basic_status;
            drop(fire);
            if !force && !hide {
                let channel = channel.to_string();
                if had_basic {
                    if let Some(text) = custom {
                        notify_local_source(net, source, |net, nick| {
                            replies::custom_no_privs(&net.my_name(), nick, &channel, &text)
                        });
                    }
                } else {
                    notify_local_source(net, source, |net, nick| {
                        replies::chanop_privs_needed(&net.my_name(), nick, &channel)
                    });
                }
            }
            continue;
        }
        if fire.do_not_set {
            continue;
        }

        // 6. Commit.
        let name = fire.name.clone();
        let mut committed_param = fire.param.clone();
        let target = fire.target.or_else(|| {
            committed_param
                .as_deref()
                .and_then(|p| Uid::from_ts6(p).ok())
        });
        drop(fire);
        let set_by = net.actor_display(source);
        let Some(chan) = net.channel_mut(channel) else {
            continue;
        };
        let applied = match kind {
            ModeKind::Normal => {
                if state {
                    if chan.has_mode(&name) {
                        false
                    } else {
                        chan.set_simple(&name, now);
                        true
                    }
                } else {
                    chan.unset_mode(&name)
                }
            }
            ModeKind::Parameter | ModeKind::ParameterSet => {
                if state {
                    match committed_param.as_deref() {
                        Some(p) if chan.mode_param(&name) == Some(p) => false,
                        Some(p) => {
                            chan.set_param(&name, p, now);
                            true
                        }
                        None => false,
                    }
                } else {
                    chan.unset_mode(&name)
                }
            }
            ModeKind::Key => {
                if state {
                    match committed_param.as_deref() {
                        Some(p) if chan.mode_param(&name) == Some(p) => false,
                        Some(p) => {
                            chan.set_param(&name, p, now);
                            true
                        }
                        None => false,
                    }
                } else {
                    // Unset consumes a stale parameter if one was given.
                    chan.unset_mode(&name)
                }
            }
            ModeKind::List => match committed_param.clone() {
                None => false,
                Some(mask) => {
                    if state {
                        chan.add_to_list(
                            &name,
                            ListEntry {
                                param: mask,
                                set_by,
                                set_at: now,
                            },
                            limits.max_list_entries,
                        )
                    } else {
                        chan.remove_from_list(&name, &mask)
                    }
                }
            },
            ModeKind::Status => match target {
                None => false,
                Some(uid) => {
                    committed_param = Some(uid.to_string());
                    if state {
                        chan.add_status(&name, uid)
                    } else {
                        chan.remove_status(&name, uid)
                    }
                }
            },
        };

        // 7. Record the committed change.
        if applied {
            if let Some(p) = &committed_param {
                run_params.push(p.clone());
            }
            log.push(ModeChange {
                set: state,
                name,
                param: committed_param,
            });
        }
    }

    log
}
