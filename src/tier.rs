//! Free/paid entitlement per client session.
//!
//! Each session moves from `Free` to `Paid` once it presents the configured
//! license key and never back. Free sessions are admitted until their
//! counter reaches the configured limit; the check and the increment happen
//! under the session's map-entry lock, so concurrent requests from one
//! session cannot overspend the quota.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Sessions untouched for this long are forgotten.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(SessionId)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Paid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionUsage {
    pub scrape_count: u32,
    pub is_paid: bool,
}

impl SessionUsage {
    pub fn tier(&self) -> Tier {
        if self.is_paid { Tier::Paid } else { Tier::Free }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Free tier limit of {limit} scrapes reached. Enter a license key to unlock the paid tier.")]
pub struct QuotaExceeded {
    pub limit: u32,
}

/// Outcome of an accepted gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub tier: Tier,
    /// Counter value after this admission (unchanged for paid sessions).
    pub scrape_count: u32,
}

/// Kept as a SHA-256 digest; candidates are compared digest to digest.
struct LicenseKey([u8; 32]);

impl LicenseKey {
    fn new(raw: &str) -> Self {
        LicenseKey(Sha256::digest(raw.as_bytes()).into())
    }

    fn matches(&self, candidate: &str) -> bool {
        let digest: [u8; 32] = Sha256::digest(candidate.as_bytes()).into();
        digest == self.0
    }
}

struct SessionEntry {
    usage: SessionUsage,
    last_seen: Instant,
}

impl SessionEntry {
    fn fresh(now: Instant) -> Self {
        Self {
            usage: SessionUsage::default(),
            last_seen: now,
        }
    }
}

pub struct TierGate {
    sessions: DashMap<SessionId, SessionEntry>,
    free_tier_limit: u32,
    license: Option<LicenseKey>,
    idle_ttl: Duration,
}

impl TierGate {
    pub fn new(free_tier_limit: u32, license_key: Option<&str>) -> Self {
        Self {
            sessions: DashMap::new(),
            free_tier_limit,
            license: license_key.map(LicenseKey::new),
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    pub fn free_tier_limit(&self) -> u32 {
        self.free_tier_limit
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn is_idle(&self, entry: &SessionEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_seen) > self.idle_ttl
    }

    /// Entry for `session`, restarted if it sat idle past the TTL, with
    /// `last_seen` bumped to `now`. Holds the entry lock until dropped.
    fn touch(&self, session: SessionId, now: Instant) -> RefMut<'_, SessionId, SessionEntry> {
        let mut entry = self
            .sessions
            .entry(session)
            .or_insert_with(|| SessionEntry::fresh(now));
        if self.is_idle(&entry, now) {
            debug!(%session, "Idle session expired");
            *entry = SessionEntry::fresh(now);
        }
        entry.last_seen = now;
        entry
    }

    /// Atomically checks the session's entitlement and counts the scrape.
    pub fn admit(&self, session: SessionId) -> Result<Admission, QuotaExceeded> {
        let mut entry = self.touch(session, Instant::now());
        let usage = &mut entry.usage;

        if usage.is_paid {
            return Ok(Admission {
                tier: Tier::Paid,
                scrape_count: usage.scrape_count,
            });
        }

        if usage.scrape_count >= self.free_tier_limit {
            debug!(%session, count = usage.scrape_count, "Free tier quota exhausted");
            return Err(QuotaExceeded {
                limit: self.free_tier_limit,
            });
        }

        usage.scrape_count += 1;
        Ok(Admission {
            tier: Tier::Free,
            scrape_count: usage.scrape_count,
        })
    }

    /// Moves the session to the paid tier if `key` is the license key.
    /// Returns whether the session is paid afterwards.
    pub fn unlock(&self, session: SessionId, key: &str) -> bool {
        let valid = self.license.as_ref().is_some_and(|license| license.matches(key));
        if !valid {
            return self.usage(session).is_paid;
        }

        let mut entry = self.touch(session, Instant::now());
        let usage = &mut entry.usage;
        if !usage.is_paid {
            usage.is_paid = true;
            info!(%session, "Session unlocked paid tier");
        }
        true
    }

    pub fn usage(&self, session: SessionId) -> SessionUsage {
        let now = Instant::now();
        self.sessions
            .get(&session)
            .filter(|entry| !self.is_idle(entry, now))
            .map(|entry| entry.usage)
            .unwrap_or_default()
    }

    /// Forgets the session; a later request with the same id starts fresh.
    pub fn end(&self, session: SessionId) {
        self.sessions.remove(&session);
    }

    /// Drops every session idle at `now`. Returns how many were removed.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| !self.is_idle(entry, now));
        before.saturating_sub(self.sessions.len())
    }

    /// Sweeps idle sessions every `every` until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let gate = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = gate.evict_idle(Instant::now());
                        if evicted > 0 {
                            debug!(evicted, remaining = gate.session_count(), "Swept idle sessions");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    pub fn remaining(&self, usage: &SessionUsage) -> Option<u32> {
        if usage.is_paid {
            None
        } else {
            Some(self.free_tier_limit.saturating_sub(usage.scrape_count))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_session_gets_exactly_the_limit() {
        let gate = TierGate::new(3, Some("secret"));
        let session = SessionId::new();

        for expected in 1..=3 {
            let admission = gate.admit(session).unwrap();
            assert_eq!(admission.tier, Tier::Free);
            assert_eq!(admission.scrape_count, expected);
        }

        assert_eq!(gate.admit(session), Err(QuotaExceeded { limit: 3 }));
        assert_eq!(gate.usage(session).scrape_count, 3);
    }

    #[test]
    fn sessions_are_counted_independently() {
        let gate = TierGate::new(1, None);
        let a = SessionId::new();
        let b = SessionId::new();

        assert!(gate.admit(a).is_ok());
        assert!(gate.admit(a).is_err());
        assert!(gate.admit(b).is_ok());
    }

    #[test]
    fn zero_limit_rejects_everything_free() {
        let gate = TierGate::new(0, None);
        assert!(gate.admit(SessionId::new()).is_err());
    }

    #[test]
    fn concurrent_admissions_never_exceed_limit() {
        let gate = Arc::new(TierGate::new(5, None));
        let session = SessionId::new();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || gate.admit(session).is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 5);
        assert_eq!(gate.usage(session).scrape_count, 5);
    }

    #[test]
    fn paid_session_is_unlimited() {
        let gate = TierGate::new(2, Some("secret"));
        let session = SessionId::new();

        gate.admit(session).unwrap();
        gate.admit(session).unwrap();
        assert!(gate.admit(session).is_err());

        assert!(gate.unlock(session, "secret"));
        for _ in 0..50 {
            assert_eq!(gate.admit(session).unwrap().tier, Tier::Paid);
        }
        assert_eq!(gate.usage(session).scrape_count, 2);
    }

    #[test]
    fn wrong_key_changes_nothing() {
        let gate = TierGate::new(3, Some("secret"));
        let session = SessionId::new();
        gate.admit(session).unwrap();

        assert!(!gate.unlock(session, "guess"));
        assert!(!gate.unlock(session, ""));

        let usage = gate.usage(session);
        assert!(!usage.is_paid);
        assert_eq!(usage.scrape_count, 1);
    }

    #[test]
    fn no_configured_key_never_unlocks() {
        let gate = TierGate::new(3, None);
        let session = SessionId::new();

        assert!(!gate.unlock(session, ""));
        assert!(!gate.unlock(session, "anything"));
        assert_eq!(gate.usage(session).tier(), Tier::Free);
    }

    #[test]
    fn paid_is_sticky_until_session_ends() {
        let gate = TierGate::new(1, Some("secret"));
        let session = SessionId::new();

        assert!(gate.unlock(session, "secret"));
        assert!(gate.unlock(session, "wrong"));
        assert!(gate.usage(session).is_paid);

        gate.end(session);
        assert_eq!(gate.usage(session), SessionUsage::default());
    }

    #[test]
    fn remaining_reflects_tier() {
        let gate = TierGate::new(3, Some("secret"));
        let session = SessionId::new();
        gate.admit(session).unwrap();

        assert_eq!(gate.remaining(&gate.usage(session)), Some(2));
        gate.unlock(session, "secret");
        assert_eq!(gate.remaining(&gate.usage(session)), None);
    }

    #[test]
    fn session_ids_parse_from_headers() {
        let id = SessionId::new();
        assert_eq!(SessionId::parse(&id.to_string()), Some(id));
        assert_eq!(SessionId::parse("not-a-uuid"), None);
    }

    #[test]
    fn idle_sessions_are_evicted() {
        let ttl = Duration::from_secs(60);
        let gate = TierGate::new(3, None).with_idle_ttl(ttl);
        for _ in 0..100 {
            gate.admit(SessionId::new()).unwrap();
        }
        assert_eq!(gate.session_count(), 100);

        assert_eq!(gate.evict_idle(Instant::now()), 0);
        assert_eq!(gate.evict_idle(Instant::now() + ttl + Duration::from_secs(1)), 100);
        assert_eq!(gate.session_count(), 0);
    }

    #[test]
    fn active_sessions_survive_a_sweep() {
        let ttl = Duration::from_secs(60);
        let gate = TierGate::new(3, Some("secret")).with_idle_ttl(ttl);
        let active = SessionId::new();
        gate.admit(active).unwrap();
        gate.unlock(active, "secret");

        assert_eq!(gate.evict_idle(Instant::now() + ttl / 2), 0);
        assert!(gate.usage(active).is_paid);
    }

    #[test]
    fn expired_session_starts_fresh() {
        let gate = TierGate::new(1, None).with_idle_ttl(Duration::ZERO);
        let session = SessionId::new();
        gate.admit(session).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(gate.usage(session), SessionUsage::default());
        assert_eq!(gate.admit(session).unwrap().scrape_count, 1);
    }

    #[tokio::test]
    async fn sweeper_runs_until_cancelled() {
        let gate = Arc::new(TierGate::new(3, None).with_idle_ttl(Duration::ZERO));
        gate.admit(SessionId::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let cancel = CancellationToken::new();
        let sweeper = gate.spawn_sweeper(Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(gate.session_count(), 0);

        cancel.cancel();
        sweeper.await.unwrap();
    }
}
