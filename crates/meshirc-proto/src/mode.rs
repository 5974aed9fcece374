//! Per-perspective channel mode tables.
//!
//! Mode letters are not portable across a mesh: each peer may bind a letter
//! to a different mode, so the engine works with stable mode *names*
//! internally and translates through a [`ModeTable`], one per server
//! perspective, at the wire boundary.
//!
//! A table maps `letter → name` and `name → (letter, kind)` where the kind
//! decides parameter handling:
//!
//! | kind | parameter |
//! |---|---|
//! | `Normal` | never |
//! | `Parameter` | when setting and unsetting |
//! | `ParameterSet` | when setting only |
//! | `List` | when mutating; absent means a list view |
//! | `Status` | always (a member identifier) |
//! | `Key` | when setting; tolerated and ignored when unsetting |

use std::collections::HashMap;
use std::fmt::Write;

/// Parameter/semantics class of a channel mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeKind {
    /// Flag mode with no parameter (`+n`, `+t`).
    Normal,
    /// Parameter on both set and unset (`+f #overflow`).
    Parameter,
    /// Parameter on set only (`+l 25`).
    ParameterSet,
    /// Mask list (`+b`, `+e`, `+I`).
    List,
    /// Membership status (`+o`, `+v`).
    Status,
    /// Channel key; unset tolerates a stale parameter (`-k`).
    Key,
}

impl ModeKind {
    /// Whether a change of this kind in direction `set` consumes a
    /// parameter when one is available.
    pub fn wants_param(self, set: bool) -> bool {
        match self {
            ModeKind::Normal => false,
            ModeKind::Parameter | ModeKind::List | ModeKind::Status => true,
            ModeKind::ParameterSet => set,
            ModeKind::Key => true,
        }
    }

    /// Whether a missing parameter makes the change invalid (as opposed to
    /// a parameterless query, which only lists support).
    pub fn requires_param(self, set: bool) -> bool {
        match self {
            ModeKind::List => false,
            ModeKind::Key => set,
            other => other.wants_param(set),
        }
    }
}

/// One parsed mode change: direction, mode name, optional parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    /// `true` for `+`, `false` for `-`.
    pub set: bool,
    /// Stable mode name (e.g. `"ban"`, `"op"`, `"moderated"`).
    pub name: String,
    /// Parameter, when the mode takes one.
    pub param: Option<String>,
}

impl ModeChange {
    /// Convenience constructor.
    pub fn new(set: bool, name: &str, param: Option<&str>) -> Self {
        Self {
            set,
            name: name.to_string(),
            param: param.map(str::to_string),
        }
    }

    /// The inverse change (same name/param, flipped direction).
    pub fn inverse(&self) -> Self {
        Self {
            set: !self.set,
            name: self.name.clone(),
            param: self.param.clone(),
        }
    }
}

/// A serialized run of mode changes: `+nt-i` plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeLine {
    /// The `+...-...` letter string.
    pub modes: String,
    /// Parameters in consumption order.
    pub params: Vec<String>,
}

/// Registration data for a status mode.
#[derive(Debug, Clone, Copy)]
struct StatusInfo {
    prefix: char,
    level: i8,
}

/// One server's view of the letter↔name bindings.
#[derive(Debug, Clone, Default)]
pub struct ModeTable {
    by_letter: HashMap<char, String>,
    by_name: HashMap<String, (char, ModeKind)>,
    status: HashMap<String, StatusInfo>,
}

impl ModeTable {
    /// An empty table (no modes bound).
    pub fn new() -> Self {
        Self::default()
    }

    /// The conventional binding set shared by TS6 daemons. Status levels
    /// run voice=1 … owner=5; "basic status" (may set simple modes) starts
    /// at halfop.
    pub fn standard() -> Self {
        let mut t = Self::new();
        t.register("ban", 'b', ModeKind::List);
        t.register("except", 'e', ModeKind::List);
        t.register("invite_except", 'I', ModeKind::List);
        t.register("access", 'A', ModeKind::List);
        t.register("no_ext", 'n', ModeKind::Normal);
        t.register("topic_lock", 't', ModeKind::Normal);
        t.register("moderated", 'm', ModeKind::Normal);
        t.register("invite_only", 'i', ModeKind::Normal);
        t.register("secret", 's', ModeKind::Normal);
        t.register("private", 'p', ModeKind::Normal);
        t.register("limit", 'l', ModeKind::ParameterSet);
        t.register("forward", 'f', ModeKind::Parameter);
        t.register("key", 'k', ModeKind::Key);
        t.register_status("owner", 'q', '~', 5);
        t.register_status("admin", 'a', '&', 4);
        t.register_status("op", 'o', '@', 3);
        t.register_status("halfop", 'h', '%', 2);
        t.register_status("voice", 'v', '+', 1);
        t
    }

    /// Bind `letter` to `name` with the given kind, replacing any previous
    /// binding of either.
    pub fn register(&mut self, name: &str, letter: char, kind: ModeKind) {
        if let Some(&(old_letter, _)) = self.by_name.get(name) {
            self.by_letter.remove(&old_letter);
        }
        if let Some(old_name) = self.by_letter.insert(letter, name.to_string()) {
            self.by_name.remove(&old_name);
            self.status.remove(&old_name);
        }
        self.by_name.insert(name.to_string(), (letter, kind));
    }

    /// Bind a status mode with its member prefix character and level.
    pub fn register_status(&mut self, name: &str, letter: char, prefix: char, level: i8) {
        self.register(name, letter, ModeKind::Status);
        self.status
            .insert(name.to_string(), StatusInfo { prefix, level });
    }

    /// Name bound to `letter`, if any.
    pub fn name_of(&self, letter: char) -> Option<&str> {
        self.by_letter.get(&letter).map(String::as_str)
    }

    /// Letter bound to `name`, if any.
    pub fn letter_of(&self, name: &str) -> Option<char> {
        self.by_name.get(name).map(|&(l, _)| l)
    }

    /// Kind of `name`, if bound.
    pub fn kind_of(&self, name: &str) -> Option<ModeKind> {
        self.by_name.get(name).map(|&(_, k)| k)
    }

    /// Status mode name owning the member prefix `prefix`.
    pub fn status_by_prefix(&self, prefix: char) -> Option<&str> {
        self.status
            .iter()
            .find(|(_, info)| info.prefix == prefix)
            .map(|(name, _)| name.as_str())
    }

    /// Member prefix character of a status mode.
    pub fn prefix_of(&self, name: &str) -> Option<char> {
        self.status.get(name).map(|i| i.prefix)
    }

    /// Privilege level of a status mode.
    pub fn level_of(&self, name: &str) -> Option<i8> {
        self.status.get(name).map(|i| i.level)
    }

    /// Status mode names, highest level first.
    pub fn status_names_desc(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.status.iter().collect();
        names.sort_by(|a, b| b.1.level.cmp(&a.1.level));
        names.into_iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Parse a `+mnt-i`-style mode string plus its parameter words into
    /// named changes under this perspective.
    ///
    /// Returns the recognized changes and the letters that had no binding
    /// (dropped; the caller decides how loudly to complain). A list mode
    /// with no parameter left is kept as a parameterless view change.
    pub fn changes_from_string(
        &self,
        mode_str: &str,
        params: &[&str],
    ) -> (Vec<ModeChange>, Vec<char>) {
        let mut changes = Vec::new();
        let mut unknown = Vec::new();
        let mut set = true;
        let mut next_param = 0usize;

        for letter in mode_str.chars() {
            match letter {
                '+' => set = true,
                '-' => set = false,
                _ => {
                    let Some(name) = self.name_of(letter) else {
                        unknown.push(letter);
                        continue;
                    };
                    let kind = self.kind_of(name).unwrap_or(ModeKind::Normal);
                    let param = if kind.wants_param(set) && next_param < params.len() {
                        let p = params[next_param];
                        next_param += 1;
                        Some(p.to_string())
                    } else {
                        None
                    };
                    if param.is_none() && kind.requires_param(set) {
                        continue;
                    }
                    changes.push(ModeChange {
                        set,
                        name: name.to_string(),
                        param,
                    });
                }
            }
        }
        (changes, unknown)
    }

    /// Serialize named changes back into mode lines under this perspective.
    ///
    /// Changes whose name has no binding here are skipped; that is the
    /// lossy part of talking to a peer with a narrower perspective. With
    /// `organize`, positive changes are emitted before negative ones.
    /// `split` caps the number of parameters per line, yielding as many
    /// lines as needed (a cap of 0 is treated as unsplit).
    pub fn strings_from_changes(
        &self,
        changes: &[ModeChange],
        split: usize,
        organize: bool,
    ) -> Vec<ModeLine> {
        let mut ordered: Vec<&ModeChange> = changes.iter().collect();
        if organize {
            // Stable: relative order within each sign is preserved.
            ordered.sort_by_key(|c| !c.set);
        }

        let mut lines = Vec::new();
        let mut modes = String::new();
        let mut params: Vec<String> = Vec::new();
        let mut sign: Option<bool> = None;

        for change in ordered {
            let Some(letter) = self.letter_of(&change.name) else {
                continue;
            };
            let would_have = params.len() + usize::from(change.param.is_some());
            if split != 0 && would_have > split && !modes.is_empty() {
                lines.push(ModeLine {
                    modes: std::mem::take(&mut modes),
                    params: std::mem::take(&mut params),
                });
                sign = None;
            }
            if sign != Some(change.set) {
                let _ = write!(modes, "{}", if change.set { '+' } else { '-' });
                sign = Some(change.set);
            }
            modes.push(letter);
            if let Some(p) = &change.param {
                params.push(p.clone());
            }
        }
        if !modes.is_empty() {
            lines.push(ModeLine { modes, params });
        }
        lines
    }
}
