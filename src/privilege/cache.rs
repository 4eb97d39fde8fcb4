//! Privilege Cache
//! Mission: In-memory mirror of the durable permission table with
//! hierarchical lookup and best-effort convergence

use crate::error::StoreError;
use crate::privilege::mask::PrivilegeMask;
use crate::store::{PrivilegeRecord, PrivilegeStore, PRIVILEGE_RECORD_ID};
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Global/default authorization domain
pub const MAIN_MODULE: &str = "main";

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// (subject, module) where subject is an account id or a group name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrivilegeKey {
    subject: String,
    module: String,
}

impl PrivilegeKey {
    pub fn new(subject: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            module: module.into(),
        }
    }

    pub fn for_account(account_id: Uuid, module: &str) -> Self {
        Self::new(account_id.to_string(), module)
    }

    pub fn for_group(group: &str, module: &str) -> Self {
        Self::new(group, module)
    }

    /// Parse the persisted "subject.module" form
    pub fn parse(raw: &str) -> Option<Self> {
        let (subject, module) = raw.split_once('.')?;
        if subject.is_empty() || module.is_empty() {
            return None;
        }
        Some(Self::new(subject, module))
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn module(&self) -> &str {
        &self.module
    }
}

impl fmt::Display for PrivilegeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.subject, self.module)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaskOp {
    Grant(PrivilegeMask),
    Revoke(PrivilegeMask),
    Remove,
}

/// Result of one convergence step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Durable copy unchanged and nothing pending
    Unchanged,
    /// Durable copy had advanced; local state reloaded with nothing left to push
    Reloaded,
    /// Local changes written with a new timestamp
    Pushed,
    /// Another writer won the compare-and-swap; retried next tick
    Conflict,
}

struct Table {
    rules: HashMap<PrivilegeKey, PrivilegeMask>,
    /// Timestamp of the durable state this table last converged with
    timestamp: Option<DateTime<Utc>>,
    /// Local mutations not yet written back, replayed over a reload
    pending: Vec<(PrivilegeKey, MaskOp)>,
}

impl Table {
    fn empty() -> Self {
        Self {
            rules: HashMap::new(),
            timestamp: None,
            pending: Vec::new(),
        }
    }

    fn apply(&mut self, key: &PrivilegeKey, op: MaskOp) -> bool {
        let current = self.rules.get(key).copied();
        let next = match op {
            MaskOp::Grant(flags) => Some(current.unwrap_or_default().grant(flags)),
            MaskOp::Revoke(flags) => Some(current.unwrap_or_default().revoke(flags)),
            MaskOp::Remove => None,
        };

        if next == current {
            return false;
        }

        match next {
            Some(mask) => self.rules.insert(key.clone(), mask),
            None => self.rules.remove(key),
        };
        true
    }

    fn replace_with(&mut self, record: PrivilegeRecord) {
        self.rules = rules_from_record(&record.rules);
        self.timestamp = Some(record.time);

        let pending = std::mem::take(&mut self.pending);
        for (key, op) in pending {
            if self.apply(&key, op) {
                self.pending.push((key, op));
            }
        }
    }

    fn to_record(&self, time: DateTime<Utc>) -> PrivilegeRecord {
        PrivilegeRecord {
            id: PRIVILEGE_RECORD_ID.to_string(),
            rules: self
                .rules
                .iter()
                .map(|(key, mask)| (key.to_string(), mask.to_stored()))
                .collect(),
            time,
        }
    }
}

fn rules_from_record(rules: &BTreeMap<String, i64>) -> HashMap<PrivilegeKey, PrivilegeMask> {
    rules
        .iter()
        .filter_map(|(raw, value)| match PrivilegeKey::parse(raw) {
            Some(key) => Some((key, PrivilegeMask::from_stored(*value))),
            None => {
                warn!("Skipping malformed privilege key '{}'", raw);
                None
            }
        })
        .collect()
}

/// Strictly after `previous`, at the store's microsecond precision
fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    let now = now
        .duration_trunc(ChronoDuration::microseconds(1))
        .unwrap_or(now);
    match previous {
        Some(prev) if now <= prev => prev + ChronoDuration::microseconds(1),
        _ => now,
    }
}

/// Shared permission table. Readers and writers are serialized by a
/// reader/writer lock that is never held across durable I/O.
pub struct PrivilegeCache {
    table: RwLock<Table>,
    store: Arc<dyn PrivilegeStore>,
}

impl PrivilegeCache {
    /// Empty cache; nothing is granted until rules are set or loaded
    pub fn new(store: Arc<dyn PrivilegeStore>) -> Self {
        Self {
            table: RwLock::new(Table::empty()),
            store,
        }
    }

    /// Mirror the durable table, seeding the default rules when none exists yet
    pub async fn load(store: Arc<dyn PrivilegeStore>) -> Result<Self, StoreError> {
        let cache = Self::new(store);

        match cache.store.load_privileges().await? {
            Some(record) => {
                info!(
                    "🛡️  Loaded {} privilege rules (version {})",
                    record.rules.len(),
                    record.time
                );
                cache.table.write().replace_with(record);
            }
            None => {
                info!("🛡️  No privilege table found, seeding defaults");
                cache.seed_defaults();
            }
        }

        Ok(cache)
    }

    /// Default group rules for the main module
    pub fn seed_defaults(&self) {
        use PrivilegeMask as P;

        self.set_group("guest", MAIN_MODULE, P::PUBLIC_READ);
        self.set_group("banned", MAIN_MODULE, P::OWNER_READ | P::PUBLIC_READ);
        self.set_group("user", MAIN_MODULE, P::OWNER_ALL | P::PUBLIC_READ);
        self.set_group(
            "moderator",
            MAIN_MODULE,
            P::OWNER_ALL | P::PUBLIC_READ | P::PUBLIC_UPDATE,
        );
        self.set_group("admin", MAIN_MODULE, P::all());
    }

    /// Resolve allow/deny. The first key that exists among
    /// subject+module, subject+main, group+module, group+main decides,
    /// even when it grants less than a broader key would.
    pub fn check(
        &self,
        subject: Uuid,
        group: &str,
        module: &str,
        required: PrivilegeMask,
    ) -> bool {
        let subject = subject.to_string();
        let tiers = [
            (subject.as_str(), module),
            (subject.as_str(), MAIN_MODULE),
            (group, module),
            (group, MAIN_MODULE),
        ];

        let table = self.table.read();
        for (owner, domain) in tiers {
            let key = PrivilegeKey::new(owner, domain);
            if let Some(mask) = table.rules.get(&key) {
                let allowed = mask.allows(required);
                debug!(
                    key = %key,
                    required = %required,
                    allowed,
                    "Privilege resolved"
                );
                return allowed;
            }
        }

        debug!(group, module, "No privilege rule found, denying");
        false
    }

    pub fn mask(&self, key: &PrivilegeKey) -> Option<PrivilegeMask> {
        self.table.read().rules.get(key).copied()
    }

    /// Union the flags into the key's mask. Returns false when nothing changed.
    pub fn set(&self, key: &PrivilegeKey, flags: PrivilegeMask) -> bool {
        self.mutate(key, MaskOp::Grant(flags))
    }

    /// Remove the flags from the key's mask. An absent key becomes an
    /// explicit (possibly empty) override.
    pub fn unset(&self, key: &PrivilegeKey, flags: PrivilegeMask) -> bool {
        self.mutate(key, MaskOp::Revoke(flags))
    }

    /// Drop the key entirely so lookups fall through to the next tier
    pub fn remove(&self, key: &PrivilegeKey) -> bool {
        self.mutate(key, MaskOp::Remove)
    }

    pub fn set_group(&self, group: &str, module: &str, flags: PrivilegeMask) -> bool {
        self.set(&PrivilegeKey::for_group(group, module), flags)
    }

    pub fn unset_group(&self, group: &str, module: &str, flags: PrivilegeMask) -> bool {
        self.unset(&PrivilegeKey::for_group(group, module), flags)
    }

    pub fn set_account(&self, account_id: Uuid, module: &str, flags: PrivilegeMask) -> bool {
        self.set(&PrivilegeKey::for_account(account_id, module), flags)
    }

    pub fn unset_account(&self, account_id: Uuid, module: &str, flags: PrivilegeMask) -> bool {
        self.unset(&PrivilegeKey::for_account(account_id, module), flags)
    }

    /// Drop every override held by one subject, returning how many went
    pub fn remove_subject(&self, subject: &str) -> usize {
        let mut table = self.table.write();
        let keys: Vec<PrivilegeKey> = table
            .rules
            .keys()
            .filter(|key| key.subject == subject)
            .cloned()
            .collect();

        for key in &keys {
            table.apply(key, MaskOp::Remove);
            table.pending.push((key.clone(), MaskOp::Remove));
        }
        keys.len()
    }

    fn mutate(&self, key: &PrivilegeKey, op: MaskOp) -> bool {
        let mut table = self.table.write();
        let changed = table.apply(key, op);
        if changed {
            table.pending.push((key.clone(), op));
        }
        changed
    }

    /// Timestamp of the durable state last converged with
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.table.read().timestamp
    }

    pub fn has_pending(&self) -> bool {
        !self.table.read().pending.is_empty()
    }

    /// Persisted form of the current local rules
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.table
            .read()
            .rules
            .iter()
            .map(|(key, mask)| (key.to_string(), mask.to_stored()))
            .collect()
    }

    /// One convergence step: reload when the durable copy has advanced,
    /// then push pending local changes with a compare-and-swap on the
    /// timestamp. Durable I/O happens outside the lock.
    pub async fn sync_once(&self) -> Result<SyncOutcome, StoreError> {
        let durable = self.store.privileges_timestamp().await?;
        let local = self.timestamp();

        let mut reloaded = false;
        if durable.is_some() && durable != local {
            if let Some(record) = self.store.load_privileges().await? {
                info!("🛡️  Privilege table changed externally, reloading");
                self.table.write().replace_with(record);
                reloaded = true;
            }
        }

        let (record, expected, drained) = {
            let table = self.table.read();
            let must_seed = durable.is_none() && !table.rules.is_empty();
            if table.pending.is_empty() && !must_seed {
                return Ok(if reloaded {
                    SyncOutcome::Reloaded
                } else {
                    SyncOutcome::Unchanged
                });
            }
            let expected = if durable.is_some() { table.timestamp } else { None };
            (
                table.to_record(next_timestamp(table.timestamp)),
                expected,
                table.pending.len(),
            )
        };

        if !self.store.save_privileges(&record, expected).await? {
            debug!("Privilege push lost to another writer, retrying next tick");
            return Ok(SyncOutcome::Conflict);
        }

        let mut table = self.table.write();
        if table.timestamp == expected {
            table.timestamp = Some(record.time);
            // Mutations made during the push stay pending
            let drained = drained.min(table.pending.len());
            table.pending.drain(..drained);
        }
        info!(
            "🛡️  Pushed {} privilege rules (version {})",
            record.rules.len(),
            record.time
        );

        Ok(SyncOutcome::Pushed)
    }

    /// Run `sync_once` every `every` until the returned handle is stopped or dropped
    pub fn start_sync(self: &Arc<Self>, every: Duration) -> SyncHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cache = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("🔄 Privilege sync started ({}ms interval)", every.as_millis());

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = cache.sync_once().await {
                            warn!("⚠️ Privilege sync failed: {}", e);
                        }
                    }
                }
            }

            info!("🔄 Privilege sync stopped");
        });

        SyncHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to the background convergence task
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Signal the task and wait for it; an in-flight push finishes first
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Privilege sync task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use tempfile::NamedTempFile;

    use PrivilegeMask as P;

    fn create_test_store() -> (Arc<SqliteStore>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = Arc::new(
            SqliteStore::new(temp_file.path().to_str().unwrap(), Duration::from_secs(3)).unwrap(),
        );
        (store, temp_file)
    }

    struct UnavailableStore;

    #[async_trait]
    impl PrivilegeStore for UnavailableStore {
        async fn load_privileges(&self) -> Result<Option<PrivilegeRecord>, StoreError> {
            Err(StoreError::Unavailable)
        }

        async fn privileges_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
            Err(StoreError::Unavailable)
        }

        async fn save_privileges(
            &self,
            _record: &PrivilegeRecord,
            _expected: Option<DateTime<Utc>>,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable)
        }
    }

    fn offline_cache() -> PrivilegeCache {
        PrivilegeCache::new(Arc::new(UnavailableStore))
    }

    #[test]
    fn test_key_format() {
        let key = PrivilegeKey::for_group("user", "blog");
        assert_eq!(key.to_string(), "user.blog");
        assert_eq!(PrivilegeKey::parse("user.blog"), Some(key));
        assert_eq!(PrivilegeKey::parse("nodot"), None);
        assert_eq!(PrivilegeKey::parse(".main"), None);
    }

    #[test]
    fn test_missing_rules_deny() {
        let cache = offline_cache();
        assert!(!cache.check(Uuid::new_v4(), "user", MAIN_MODULE, P::OWNER_READ));
    }

    #[test]
    fn test_specific_denial_overrides_group_grant() {
        let cache = offline_cache();
        let restricted = Uuid::new_v4();
        let regular = Uuid::new_v4();

        cache.set_group("user", MAIN_MODULE, P::OWNER_ALL | P::PUBLIC_READ);
        cache.set_account(restricted, MAIN_MODULE, P::PUBLIC_READ);

        assert!(cache.check(regular, "user", MAIN_MODULE, P::OWNER_WRITE));
        assert!(!cache.check(restricted, "user", MAIN_MODULE, P::OWNER_WRITE));
        assert!(cache.check(restricted, "user", MAIN_MODULE, P::PUBLIC_READ));
    }

    #[test]
    fn test_resolution_order_across_modules() {
        let cache = offline_cache();
        let subject = Uuid::new_v4();

        cache.set_group("user", MAIN_MODULE, P::OWNER_ALL);
        cache.set_group("user", "blog", P::OWNER_READ);
        // group+module beats group+main
        assert!(!cache.check(subject, "user", "blog", P::OWNER_WRITE));
        assert!(cache.check(subject, "user", "wiki", P::OWNER_WRITE));

        cache.set_account(subject, MAIN_MODULE, P::PUBLIC_DELETE);
        // subject+main beats both group tiers
        assert!(cache.check(subject, "user", "blog", P::PUBLIC_DELETE));
        assert!(!cache.check(subject, "user", "blog", P::OWNER_READ));

        cache.set_account(subject, "blog", P::OWNER_UPDATE);
        // subject+module beats subject+main
        assert!(cache.check(subject, "user", "blog", P::OWNER_UPDATE));
        assert!(!cache.check(subject, "user", "blog", P::PUBLIC_DELETE));

        // Removing an override falls through to the next tier again
        assert!(cache.remove(&PrivilegeKey::for_account(subject, "blog")));
        assert!(cache.check(subject, "user", "blog", P::PUBLIC_DELETE));
    }

    #[test]
    fn test_unset_on_absent_key_is_explicit_denial() {
        let cache = offline_cache();
        let subject = Uuid::new_v4();
        cache.set_group("user", MAIN_MODULE, P::OWNER_ALL);

        assert!(cache.unset_account(subject, MAIN_MODULE, P::OWNER_DELETE));
        assert_eq!(
            cache.mask(&PrivilegeKey::for_account(subject, MAIN_MODULE)),
            Some(P::empty())
        );
        assert!(!cache.check(subject, "user", MAIN_MODULE, P::OWNER_READ));
    }

    #[test]
    fn test_remove_subject_drops_all_overrides() {
        let cache = offline_cache();
        let subject = Uuid::new_v4();
        cache.set_group("user", MAIN_MODULE, P::OWNER_ALL);
        cache.set_account(subject, MAIN_MODULE, P::PUBLIC_READ);
        cache.set_account(subject, "blog", P::OWNER_READ);

        assert_eq!(cache.remove_subject(&subject.to_string()), 2);
        assert_eq!(cache.remove_subject(&subject.to_string()), 0);
        assert!(cache.check(subject, "user", "blog", P::OWNER_WRITE));
    }

    #[test]
    fn test_guest_only_gets_public_read() {
        let cache = offline_cache();
        cache.seed_defaults();

        assert!(cache.check(Uuid::nil(), "guest", "blog", P::PUBLIC_READ));
        assert!(!cache.check(Uuid::nil(), "guest", "blog", P::OWNER_WRITE));
        assert!(cache.check(Uuid::new_v4(), "admin", MAIN_MODULE, P::all()));
    }

    #[test]
    fn test_mutations_are_idempotent() {
        let cache = offline_cache();
        let key = PrivilegeKey::for_group("user", MAIN_MODULE);

        assert!(cache.set(&key, P::OWNER_READ));
        assert!(!cache.set(&key, P::OWNER_READ));
        assert!(!cache.unset(&key, P::PUBLIC_DELETE));
        assert_eq!(cache.table.read().pending.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_set_does_not_write_again() {
        let (store, _temp) = create_test_store();
        let cache = PrivilegeCache::load(store.clone()).await.unwrap();
        let key = PrivilegeKey::for_group("editor", "blog");

        cache.set(&key, P::OWNER_WRITE);
        assert_eq!(cache.sync_once().await.unwrap(), SyncOutcome::Pushed);
        let version = cache.timestamp();
        assert!(version.is_some());
        assert_eq!(store.privileges_timestamp().await.unwrap(), version);

        assert!(!cache.set(&key, P::OWNER_WRITE));
        assert!(!cache.has_pending());
        assert_eq!(cache.sync_once().await.unwrap(), SyncOutcome::Unchanged);
        assert_eq!(cache.timestamp(), version);
        assert_eq!(store.privileges_timestamp().await.unwrap(), version);
    }

    #[tokio::test]
    async fn test_load_seeds_and_persists_defaults() {
        let (store, _temp) = create_test_store();

        let first = PrivilegeCache::load(store.clone()).await.unwrap();
        assert!(first.has_pending());
        assert_eq!(first.sync_once().await.unwrap(), SyncOutcome::Pushed);

        let second = PrivilegeCache::load(store.clone()).await.unwrap();
        assert!(!second.has_pending());
        assert_eq!(second.snapshot(), first.snapshot());
        assert_eq!(second.snapshot().get("guest.main"), Some(&16));
    }

    #[tokio::test]
    async fn test_divergence_reloads_and_replays_local_changes() {
        let (store, _temp) = create_test_store();
        let a = PrivilegeCache::load(store.clone()).await.unwrap();
        a.sync_once().await.unwrap();
        let b = PrivilegeCache::load(store.clone()).await.unwrap();

        a.set_group("editor", "blog", P::OWNER_WRITE);
        assert_eq!(a.sync_once().await.unwrap(), SyncOutcome::Pushed);

        // B changed something else locally before noticing A's write
        b.set_group("reviewer", "blog", P::PUBLIC_READ);
        assert_eq!(b.sync_once().await.unwrap(), SyncOutcome::Pushed);
        assert!(b.check(Uuid::new_v4(), "editor", "blog", P::OWNER_WRITE));
        assert!(b.check(Uuid::new_v4(), "reviewer", "blog", P::PUBLIC_READ));

        // A picks up B's change without clobbering it
        assert_eq!(a.sync_once().await.unwrap(), SyncOutcome::Reloaded);
        assert!(a.check(Uuid::new_v4(), "reviewer", "blog", P::PUBLIC_READ));
        assert_eq!(a.snapshot(), b.snapshot());
    }

    /// Lets another writer land between the timestamp read and the push, once
    struct RacingStore {
        inner: Arc<SqliteStore>,
        raced: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl PrivilegeStore for RacingStore {
        async fn load_privileges(&self) -> Result<Option<PrivilegeRecord>, StoreError> {
            self.inner.load_privileges().await
        }

        async fn privileges_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
            self.inner.privileges_timestamp().await
        }

        async fn save_privileges(
            &self,
            record: &PrivilegeRecord,
            expected: Option<DateTime<Utc>>,
        ) -> Result<bool, StoreError> {
            if !self.raced.swap(true, std::sync::atomic::Ordering::SeqCst) {
                let mut rival = self.inner.load_privileges().await?.unwrap();
                let previous = rival.time;
                rival
                    .rules
                    .insert("rival.blog".to_string(), P::PUBLIC_READ.to_stored());
                rival.time = next_timestamp(Some(previous));
                assert!(self.inner.save_privileges(&rival, Some(previous)).await?);
            }
            self.inner.save_privileges(record, expected).await
        }
    }

    #[tokio::test]
    async fn test_lost_push_reports_conflict_then_converges() {
        let (store, _temp) = create_test_store();
        let seeder = PrivilegeCache::load(store.clone()).await.unwrap();
        seeder.sync_once().await.unwrap();

        let racing = Arc::new(RacingStore {
            inner: store.clone(),
            raced: std::sync::atomic::AtomicBool::new(false),
        });
        let cache = PrivilegeCache::load(racing).await.unwrap();

        cache.set_group("editor", "blog", P::OWNER_WRITE);
        assert_eq!(cache.sync_once().await.unwrap(), SyncOutcome::Conflict);
        assert!(cache.has_pending());
        let record = store.load_privileges().await.unwrap().unwrap();
        assert!(record.rules.get("editor.blog").is_none());

        // Next step reloads the rival write, replays the pending grant and pushes
        assert_eq!(cache.sync_once().await.unwrap(), SyncOutcome::Pushed);
        assert!(!cache.has_pending());
        assert!(cache.check(Uuid::new_v4(), "rival", "blog", P::PUBLIC_READ));
        assert!(cache.check(Uuid::new_v4(), "editor", "blog", P::OWNER_WRITE));

        let record = store.load_privileges().await.unwrap().unwrap();
        assert_eq!(record.rules.get("rival.blog"), Some(&P::PUBLIC_READ.to_stored()));
        assert_eq!(record.rules.get("editor.blog"), Some(&P::OWNER_WRITE.to_stored()));
        assert_eq!(cache.timestamp(), Some(record.time));
    }

    #[tokio::test]
    async fn test_background_sync_pushes_until_stopped() {
        let (store, _temp) = create_test_store();
        let cache = Arc::new(PrivilegeCache::load(store.clone()).await.unwrap());

        let handle = cache.start_sync(Duration::from_millis(20));
        cache.set_group("editor", "blog", P::OWNER_WRITE);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let record = store.load_privileges().await.unwrap().unwrap();
        assert_eq!(record.rules.get("editor.blog"), Some(&2));

        handle.stop().await;

        cache.set_group("late", "blog", P::OWNER_READ);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let record = store.load_privileges().await.unwrap().unwrap();
        assert!(record.rules.get("late.blog").is_none());
        assert!(cache.has_pending());
    }

    #[tokio::test]
    async fn test_unavailable_store_surfaces_error() {
        let cache = offline_cache();
        cache.set_group("user", MAIN_MODULE, P::OWNER_READ);

        assert_eq!(cache.sync_once().await, Err(StoreError::Unavailable));
        assert!(matches!(
            PrivilegeCache::load(Arc::new(UnavailableStore)).await,
            Err(StoreError::Unavailable)
        ));
        // Local decisions keep working
        assert!(cache.check(Uuid::new_v4(), "user", MAIN_MODULE, P::OWNER_READ));
        assert!(cache.has_pending());
    }
}
