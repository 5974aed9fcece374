//! The global ban engine.
//!
//! Ban records live in memory and are re-advertised on every link-up;
//! identity across the fleet is `"{sid}.{fnv1a(mask)}"`, so the same ban
//! reported with textual variants (case, source peer) converges on one
//! record. Deletion is represented as a disabled record with duration 0,
//! kept until its lifetime passes so the deletion itself keeps
//! propagating to late-joining peers.

use std::collections::HashMap;

use meshirc_proto::{irc_to_lower, wildcard_match, Sid};
use tracing::{debug, warn};

use crate::state::{Actor, User};

/// FNV-1a 32-bit over the lowercase-normalized input. The decimal
/// rendering of this hash is part of the wire contract for ban identity;
/// peers must compute the same value.
pub fn fnv1a_32(input: &str) -> u32 {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET;
    for byte in irc_to_lower(input).bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Global identity of a ban originated by `sid` on `mask`.
pub fn ban_id(sid: Sid, mask: &str) -> String {
    format!("{}.{}", sid.0, fnv1a_32(mask))
}

/// What a ban matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BanKind {
    /// `user@host` ban.
    Kline,
    /// IP ban.
    Dline,
    /// Reserved nick or channel mask.
    Resv,
    /// A nick withheld for a duration after services enforcement.
    NickDelay,
}

impl BanKind {
    /// `BAN` command type letter, where one exists.
    pub fn ban_letter(self) -> Option<char> {
        match self {
            BanKind::Kline => Some('K'),
            BanKind::Resv => Some('R'),
            BanKind::Dline | BanKind::NickDelay => None,
        }
    }

    /// Parse a `BAN` command type letter.
    pub fn from_ban_letter(letter: &str) -> Option<Self> {
        match letter {
            "K" => Some(BanKind::Kline),
            "R" => Some(BanKind::Resv),
            _ => None,
        }
    }
}

/// One ban record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ban {
    /// Fleet-wide identity (`"{sid}.{fnv}"`).
    pub id: String,
    pub kind: BanKind,
    /// Full match text (`user@host`, IP mask, or nick/channel mask).
    pub mask: String,
    /// K-line user part.
    pub match_user: Option<String>,
    /// K-line host part.
    pub match_host: Option<String>,
    pub reason: String,
    /// First seen, seconds.
    pub added: i64,
    /// Last modification; the tiebreaker for conflicting updates.
    pub modified: i64,
    /// Active window length from `modified`, seconds.
    pub duration: i64,
    /// Retention window length from `modified`, seconds.
    pub lifetime: i64,
    /// Name of the originating server.
    pub aserver: String,
    /// Mask of the operator who placed it, or `*`.
    pub auser: String,
    /// Most recent actor that touched the ban, used for outbound source
    /// selection.
    pub recent_source: Option<Actor>,
    /// Deleted but retained for deletion propagation.
    pub disabled: bool,
}

impl Ban {
    /// Construct a K-line record.
    #[allow(clippy::too_many_arguments)]
    pub fn kline(
        origin: Sid,
        user: &str,
        host: &str,
        reason: &str,
        now: i64,
        duration: i64,
        lifetime: i64,
        source: Option<Actor>,
    ) -> Self {
        let mask = format!("{}@{}", user, host);
        Self::raw(origin, BanKind::Kline, &mask, reason, now, duration, lifetime, source)
            .with_user_host(user, host)
    }

    /// Construct a D-line record.
    pub fn dline(
        origin: Sid,
        ip_mask: &str,
        reason: &str,
        now: i64,
        duration: i64,
        lifetime: i64,
        source: Option<Actor>,
    ) -> Self {
        Self::raw(origin, BanKind::Dline, ip_mask, reason, now, duration, lifetime, source)
    }

    /// Construct a resv or nick-delay record.
    #[allow(clippy::too_many_arguments)]
    pub fn resv(
        origin: Sid,
        mask: &str,
        reason: &str,
        now: i64,
        duration: i64,
        lifetime: i64,
        source: Option<Actor>,
        nick_delay: bool,
    ) -> Self {
        let kind = if nick_delay {
            BanKind::NickDelay
        } else {
            BanKind::Resv
        };
        Self::raw(origin, kind, mask, reason, now, duration, lifetime, source)
    }

    #[allow(clippy::too_many_arguments)]
    fn raw(
        origin: Sid,
        kind: BanKind,
        mask: &str,
        reason: &str,
        now: i64,
        duration: i64,
        lifetime: i64,
        source: Option<Actor>,
    ) -> Self {
        let duration = duration.max(0);
        Self {
            id: ban_id(origin, mask),
            kind,
            mask: mask.to_string(),
            match_user: None,
            match_host: None,
            reason: reason.to_string(),
            added: now,
            modified: now,
            duration,
            lifetime: lifetime.max(duration),
            aserver: String::new(),
            auser: "*".to_string(),
            recent_source: source,
            disabled: false,
        }
    }

    fn with_user_host(mut self, user: &str, host: &str) -> Self {
        self.match_user = Some(user.to_string());
        self.match_host = Some(host.to_string());
        self
    }

    /// When the active window closes.
    pub fn expires(&self) -> i64 {
        self.modified + self.duration
    }

    /// When the record may be pruned.
    pub fn lifetime_end(&self) -> i64 {
        self.modified + self.lifetime
    }

    /// Enforced right now?
    pub fn is_active(&self, now: i64) -> bool {
        !self.disabled && now < self.expires()
    }

    /// Still worth remembering (and advertising deletions for)?
    pub fn is_retained(&self, now: i64) -> bool {
        now < self.lifetime_end()
    }

    /// Whether this ban applies to `user`. Resv-family bans match nick
    /// reservations, not connections; see [`BanEngine::reserved`].
    pub fn matches(&self, user: &User) -> bool {
        match self.kind {
            BanKind::Kline => {
                let (Some(mu), Some(mh)) = (&self.match_user, &self.match_host) else {
                    return wildcard_match(&self.mask, &user.user_host())
                        || wildcard_match(&self.mask, &user.user_ip());
                };
                wildcard_match(mu, &user.ident)
                    && (wildcard_match(mh, &user.host) || wildcard_match(mh, &user.ip))
            }
            BanKind::Dline => wildcard_match(&self.mask, &user.ip),
            BanKind::Resv | BanKind::NickDelay => wildcard_match(&self.mask, &user.nick),
        }
    }

    /// Mark deleted, bumping `modified` so the deletion wins tiebreaks.
    pub fn disable(&mut self, now: i64, source: Option<Actor>) {
        self.disabled = true;
        self.duration = 0;
        self.lifetime = self.lifetime.max(now - self.modified);
        // Keep the retention window anchored at the new modification.
        let remaining = (self.lifetime_end() - now).max(0);
        self.modified = now;
        self.lifetime = remaining;
        if source.is_some() {
            self.recent_source = source;
        }
    }
}

/// In-memory ban table keyed by fleet-wide id.
#[derive(Default)]
pub struct BanEngine {
    bans: HashMap<String, Ban>,
}

impl BanEngine {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.bans.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }

    /// Look up by fleet-wide id.
    pub fn get(&self, id: &str) -> Option<&Ban> {
        self.bans.get(id)
    }

    /// All retained records.
    pub fn iter(&self) -> impl Iterator<Item = &Ban> {
        self.bans.values()
    }

    /// Upsert by id. A new id inserts; a known id is replaced only when
    /// the incoming `modified` is newer, and the stored kind always wins
    /// (two peers disagreeing on the kind of one identity is reported and
    /// otherwise ignored).
    pub fn create_or_update(&mut self, mut ban: Ban) -> bool {
        ban.duration = ban.duration.max(0);
        ban.lifetime = ban.lifetime.max(ban.duration);
        match self.bans.get_mut(&ban.id) {
            None => {
                debug!(id = %ban.id, mask = %ban.mask, "inserting ban");
                self.bans.insert(ban.id.clone(), ban);
                true
            }
            Some(existing) => {
                if ban.kind != existing.kind {
                    warn!(
                        id = %ban.id,
                        "ban update changes kind ({:?} -> {:?}); keeping {:?}",
                        existing.kind, ban.kind, existing.kind
                    );
                    ban.kind = existing.kind;
                }
                if ban.modified <= existing.modified {
                    return false;
                }
                ban.added = existing.added;
                // Retention only ever extends.
                if ban.lifetime_end() < existing.lifetime_end() {
                    ban.lifetime = existing.lifetime_end() - ban.modified;
                }
                *existing = ban;
                true
            }
        }
    }

    /// Semantic lookup from user-entered text, for peers that delete by
    /// mask rather than id: K-lines split on `@`, D-lines and resvs match
    /// the stored mask.
    pub fn by_user_input(&self, kind: BanKind, text: &str) -> Option<&Ban> {
        self.bans.values().find(|b| {
            if b.kind != kind {
                return false;
            }
            match kind {
                BanKind::Kline => match text.split_once('@') {
                    Some((user, host)) => {
                        b.match_user.as_deref().is_some_and(|mu| {
                            meshirc_proto::irc_eq(mu, user)
                        }) && b
                            .match_host
                            .as_deref()
                            .is_some_and(|mh| meshirc_proto::irc_eq(mh, host))
                    }
                    None => meshirc_proto::irc_eq(&b.mask, text),
                },
                _ => meshirc_proto::irc_eq(&b.mask, text),
            }
        })
    }

    /// First active K-/D-line matching `user`.
    pub fn find_matching(&self, user: &User, now: i64) -> Option<&Ban> {
        self.bans.values().find(|b| {
            matches!(b.kind, BanKind::Kline | BanKind::Dline)
                && b.is_active(now)
                && b.matches(user)
        })
    }

    /// Active reservation (resv or nick delay) covering `mask`, a nick
    /// or channel name being claimed.
    pub fn reserved(&self, mask: &str, now: i64) -> Option<&Ban> {
        self.bans.values().find(|b| {
            matches!(b.kind, BanKind::Resv | BanKind::NickDelay)
                && b.is_active(now)
                && wildcard_match(&b.mask, mask)
        })
    }

    /// Mutable access for deletion paths.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Ban> {
        self.bans.get_mut(id)
    }

    /// Drop every record whose lifetime has passed. Returns how many went.
    pub fn prune(&mut self, now: i64) -> usize {
        let before = self.bans.len();
        self.bans.retain(|_, b| b.is_retained(now));
        before - self.bans.len()
    }
}
