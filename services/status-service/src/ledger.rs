//! Bounded, timestamp-ordered history of accepted snapshots.
//!
//! Entries are stored as `historico_<key>.json`, where the key is a
//! zero-padded millisecond timestamp so that lexical order of the names
//! equals chronological order. The published index is always regenerated
//! from the directory listing, never patched.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::store::{AtomicStore, StoreError, StoreResult};

pub const INDEX_SLOT: &str = "lista_historicos.json";
const ENTRY_PREFIX: &str = "historico_";
const ENTRY_SUFFIX: &str = ".json";
const KEY_WIDTH: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey(u64);

impl EntryKey {
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn millis(self) -> u64 {
        self.0
    }

    pub fn file_name(self) -> String {
        format!("{ENTRY_PREFIX}{:0width$}{ENTRY_SUFFIX}", self.0, width = KEY_WIDTH)
    }

    /// Accepts padded and unpadded keys so older entries keep their place.
    pub fn parse(name: &str) -> Option<Self> {
        let digits = name.strip_prefix(ENTRY_PREFIX)?.strip_suffix(ENTRY_SUFFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub entry: String,
    pub total: usize,
}

pub struct HistoryLedger {
    store: Arc<AtomicStore>,
    max_entries: usize,
    // Last issued key; also serializes allocation and rotation.
    last_key: Mutex<Option<EntryKey>>,
}

impl HistoryLedger {
    pub async fn open(store: Arc<AtomicStore>, max_entries: usize) -> StoreResult<Self> {
        let ledger = Self {
            store,
            max_entries: max_entries.max(1),
            last_key: Mutex::new(None),
        };
        let existing = ledger.entries().await?;
        *ledger.last_key.lock().await = existing.last().map(|(key, _)| *key);
        Ok(ledger)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Evicts the oldest entries beyond `max_entries` and republishes the
    /// index. Returns the surviving entry names.
    pub async fn rotate(&self, max_entries: usize) -> StoreResult<Vec<String>> {
        let _guard = self.last_key.lock().await;
        self.rotate_locked(max_entries.max(1)).await
    }

    /// Writes `document` to `current_slot`, persists it as a new entry, then
    /// rotates. One lock acquisition covers all three, so the current slot
    /// always holds the newest entry's document.
    pub async fn record<T>(
        &self,
        current_slot: &str,
        document: &T,
        now_ms: u64,
    ) -> StoreResult<Recorded>
    where
        T: Serialize + ?Sized,
    {
        let mut last_key = self.last_key.lock().await;
        let previous = *last_key;
        let key = next_key(previous, now_ms)
            .ok_or_else(|| StoreError::KeysExhausted(previous.map_or(0, EntryKey::millis)))?;
        self.store.write(current_slot, document).await?;
        let entry = self.append_locked(&mut last_key, key, document).await?;
        let survivors = self.rotate_locked(self.max_entries).await?;
        Ok(Recorded {
            entry,
            total: survivors.len(),
        })
    }

    /// Entry names currently on disk, oldest first.
    pub async fn list(&self) -> StoreResult<Vec<String>> {
        Ok(self.entries().await?.into_iter().map(|(_, name)| name).collect())
    }

    /// The published index, empty when nothing has been recorded yet.
    pub async fn index(&self) -> StoreResult<Vec<String>> {
        match self.store.read(INDEX_SLOT).await {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(StoreError::NotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    async fn append_locked<T: Serialize + ?Sized>(
        &self,
        last_key: &mut Option<EntryKey>,
        key: EntryKey,
        document: &T,
    ) -> StoreResult<String> {
        let entry = key.file_name();
        self.store.write(&entry, document).await?;
        *last_key = Some(key);
        tracing::debug!(entry = entry.as_str(), key = key.millis(), "history entry appended");
        Ok(entry)
    }

    async fn rotate_locked(&self, max_entries: usize) -> StoreResult<Vec<String>> {
        let current = self.list().await?;
        if current.len() > max_entries {
            let excess = current.len() - max_entries;
            let failed = self.evict(&current[..excess]).await;
            if failed > 0 {
                tracing::warn!(failed, kept = max_entries, "history rotation left stale entries");
            }
        }

        let survivors = self.list().await?;
        self.store.write(INDEX_SLOT, &survivors).await?;
        Ok(survivors)
    }

    /// Removes each stale entry, returning how many could not be removed.
    async fn evict(&self, stale: &[String]) -> usize {
        let mut failed = 0;
        for entry in stale {
            match self.store.remove(entry).await {
                Ok(()) => tracing::debug!(entry = entry.as_str(), "history entry evicted"),
                Err(err) => {
                    failed += 1;
                    tracing::warn!(
                        entry = entry.as_str(),
                        error = %err,
                        "history eviction failed"
                    );
                }
            }
        }
        failed
    }

    async fn entries(&self) -> StoreResult<Vec<(EntryKey, String)>> {
        let mut entries: Vec<(EntryKey, String)> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter_map(|name| EntryKey::parse(&name).map(|key| (key, name)))
            .collect();
        // Stable: equal keys keep directory order.
        entries.sort_by_key(|(key, _)| *key);
        Ok(entries)
    }
}

fn next_key(last: Option<EntryKey>, now_ms: u64) -> Option<EntryKey> {
    match last {
        Some(last) if last.millis() >= now_ms => last.millis().checked_add(1).map(EntryKey),
        _ => Some(EntryKey::from_millis(now_ms)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CURRENT: &str = "status.json";

    async fn temp_ledger(
        max_entries: usize,
    ) -> (tempfile::TempDir, Arc<AtomicStore>, HistoryLedger) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(AtomicStore::open(dir.path()).await.unwrap());
        let ledger = HistoryLedger::open(store.clone(), max_entries).await.unwrap();
        (dir, store, ledger)
    }

    #[test]
    fn names_sort_like_timestamps() {
        let early = EntryKey::from_millis(999_999_999_999).file_name();
        let late = EntryKey::from_millis(1_000_000_000_000).file_name();
        assert_eq!(early, "historico_0999999999999.json");
        assert_eq!(late, "historico_1000000000000.json");
        assert!(early < late);
    }

    #[test]
    fn parses_entry_names() {
        assert_eq!(
            EntryKey::parse("historico_1700000000000.json"),
            Some(EntryKey::from_millis(1_700_000_000_000))
        );
        assert_eq!(EntryKey::parse("historico_42.json").map(EntryKey::millis), Some(42));
        assert_eq!(EntryKey::parse("historico_.json"), None);
        assert_eq!(EntryKey::parse("historico_12a.json"), None);
        assert_eq!(EntryKey::parse("historico_-1.json"), None);
        assert_eq!(EntryKey::parse("status.json"), None);
        assert_eq!(EntryKey::parse(".historico_1.json.abc.tmp"), None);
    }

    #[test]
    fn keys_never_repeat_or_go_backwards() {
        assert_eq!(next_key(None, 10), Some(EntryKey(10)));
        assert_eq!(next_key(Some(EntryKey(5)), 10), Some(EntryKey(10)));
        assert_eq!(next_key(Some(EntryKey(10)), 10), Some(EntryKey(11)));
        assert_eq!(next_key(Some(EntryKey(20)), 10), Some(EntryKey(21)));
        assert_eq!(next_key(Some(EntryKey(u64::MAX)), 10), None);
    }

    #[tokio::test]
    async fn exhausted_keys_refuse_the_record() {
        let (_dir, store, _ledger) = temp_ledger(10).await;
        let last = format!("historico_{}.json", u64::MAX);
        store.write(&last, &json!({"n": 0})).await.unwrap();

        let ledger = HistoryLedger::open(store.clone(), 10).await.unwrap();
        let err = ledger
            .record(CURRENT, &json!({"n": 1}), 1_000)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::KeysExhausted(key) if key == u64::MAX));

        assert_eq!(ledger.list().await.unwrap(), vec![last]);
        assert!(matches!(
            store.read(CURRENT).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn failed_eviction_does_not_stop_the_others() {
        let (dir, store, ledger) = temp_ledger(1).await;
        for key in [2u64, 3, 4] {
            store.write(&EntryKey(key).file_name(), &json!({})).await.unwrap();
        }
        // A directory under an entry name cannot be removed as a file.
        let blocked = "historico_1.json".to_string();
        std::fs::create_dir(dir.path().join(&blocked)).unwrap();

        let stale = vec![blocked.clone(), EntryKey(2).file_name(), EntryKey(3).file_name()];
        assert_eq!(ledger.evict(&stale).await, 1);
        assert!(dir.path().join(&blocked).is_dir());
        assert_eq!(ledger.list().await.unwrap(), vec![EntryKey(4).file_name()]);

        let survivors = ledger.rotate(1).await.unwrap();
        assert_eq!(survivors, vec![EntryKey(4).file_name()]);
        assert_eq!(ledger.index().await.unwrap(), ledger.list().await.unwrap());
    }

    #[tokio::test]
    async fn current_slot_tracks_newest_entry() {
        let (_dir, store, ledger) = temp_ledger(3).await;
        let ledger = Arc::new(ledger);
        let mut handles = Vec::new();
        for n in 0..8u64 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.record(CURRENT, &json!({"n": n}), 9_000).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let newest = ledger.list().await.unwrap().pop().unwrap();
        assert_eq!(
            store.read(CURRENT).await.unwrap(),
            store.read(&newest).await.unwrap()
        );
    }

    #[tokio::test]
    async fn same_millisecond_gets_distinct_names() {
        let (_dir, _store, ledger) = temp_ledger(10).await;
        let first = ledger.record(CURRENT, &json!({"n": 1}), 1_000).await.unwrap().entry;
        let second = ledger.record(CURRENT, &json!({"n": 2}), 1_000).await.unwrap().entry;
        assert_ne!(first, second);
        assert_eq!(ledger.list().await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn list_orders_by_embedded_timestamp() {
        let (_dir, store, ledger) = temp_ledger(10).await;
        // Legacy unpadded names must sort numerically, not lexically.
        store.write("historico_900.json", &json!({})).await.unwrap();
        store.write("historico_10000.json", &json!({})).await.unwrap();
        store.write("historico_2000.json", &json!({})).await.unwrap();
        store.write("status.json", &json!({})).await.unwrap();

        assert_eq!(
            ledger.list().await.unwrap(),
            vec![
                "historico_900.json".to_string(),
                "historico_2000.json".to_string(),
                "historico_10000.json".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn record_evicts_oldest_beyond_bound() {
        let (_dir, store, ledger) = temp_ledger(3).await;
        let mut names = Vec::new();
        for n in 0..5u64 {
            let recorded = ledger.record(CURRENT, &json!({"n": n}), 1_000 + n).await.unwrap();
            assert_eq!(recorded.total, (n as usize + 1).min(3));
            names.push(recorded.entry);
        }

        let expected = names[2..].to_vec();
        assert_eq!(ledger.list().await.unwrap(), expected);
        assert_eq!(ledger.index().await.unwrap(), expected);
        assert_eq!(store.read(&names[4]).await.unwrap(), json!({"n": 4}));
        assert!(matches!(
            store.read(&names[0]).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn rotate_with_smaller_bound_republishes_index() {
        let (_dir, _store, ledger) = temp_ledger(10).await;
        for n in 0..4u64 {
            ledger.record(CURRENT, &json!({}), 5_000 + n).await.unwrap();
        }
        let survivors = ledger.rotate(1).await.unwrap();
        assert_eq!(survivors, vec![EntryKey(5_003).file_name()]);
        assert_eq!(ledger.index().await.unwrap(), survivors);
    }

    #[tokio::test]
    async fn index_is_empty_before_first_record() {
        let (_dir, _store, ledger) = temp_ledger(10).await;
        assert!(ledger.index().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reopen_continues_after_existing_entries() {
        let (dir, store, ledger) = temp_ledger(10).await;
        ledger.record(CURRENT, &json!({}), 50_000).await.unwrap();
        drop(ledger);

        let reopened = HistoryLedger::open(store, 10).await.unwrap();
        let recorded = reopened.record(CURRENT, &json!({}), 10).await.unwrap();
        assert_eq!(recorded.entry, EntryKey(50_001).file_name());
        assert_eq!(recorded.total, 2);
        drop(dir);
    }

    #[tokio::test]
    async fn zero_bound_keeps_latest_entry() {
        let (_dir, _store, ledger) = temp_ledger(0).await;
        assert_eq!(ledger.max_entries(), 1);
        ledger.record(CURRENT, &json!({}), 1).await.unwrap();
        let recorded = ledger.record(CURRENT, &json!({}), 2).await.unwrap();
        assert_eq!(recorded.total, 1);
        assert_eq!(ledger.list().await.unwrap(), vec![recorded.entry]);
    }

    #[tokio::test]
    async fn concurrent_records_keep_index_consistent() {
        let (_dir, _store, ledger) = temp_ledger(5).await;
        let ledger = Arc::new(ledger);
        let mut handles = Vec::new();
        for n in 0..12u64 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.record(CURRENT, &json!({"n": n}), 7_000).await.unwrap()
            }));
        }
        let mut entries = Vec::new();
        for handle in handles {
            entries.push(handle.await.unwrap().entry);
        }
        entries.sort();
        entries.dedup();
        assert_eq!(entries.len(), 12);

        let on_disk = ledger.list().await.unwrap();
        assert_eq!(on_disk.len(), 5);
        assert_eq!(ledger.index().await.unwrap(), on_disk);
        assert_eq!(on_disk, entries[7..].to_vec());
    }
}
