//! Embedded in-memory store.
//!
//! Implements the [`Store`] contract with snapshot isolation and optimistic
//! conflict detection. The committed state is an `Arc`-swapped ordered map;
//! transactions capture the `Arc` at begin (their snapshot), buffer writes
//! in an overlay for read-your-writes, and validate their recorded reads at
//! commit against per-key last-writer sequence numbers. A read key or range
//! written by a transaction that committed after this one's snapshot fails
//! the commit with `CommitConflict`.
//!
//! Commit clones the committed map, so this store is sized for embedded and
//! test use, not for large keyspaces.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Error, Result};
use crate::keys::KeyRange;
use crate::store::{Store, Transaction};

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

struct Committed {
    /// Commit sequence number; bumped once per applied commit.
    seq: u64,
    /// The committed keyspace, swapped atomically on commit.
    entries: Arc<Entries>,
    /// Last commit sequence that wrote (or cleared) each key.
    key_versions: BTreeMap<Vec<u8>, u64>,
}

/// In-memory transactional ordered key-value store.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<Committed>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        MemoryStore {
            state: Arc::new(Mutex::new(Committed {
                seq: 0,
                entries: Arc::new(BTreeMap::new()),
                key_versions: BTreeMap::new(),
            })),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    type Txn = MemoryTransaction;

    fn begin(&self) -> Result<MemoryTransaction> {
        Ok(self.transaction(false))
    }

    fn begin_snapshot(&self) -> Result<MemoryTransaction> {
        Ok(self.transaction(true))
    }
}

impl MemoryStore {
    fn transaction(&self, read_only: bool) -> MemoryTransaction {
        let state = self.state.lock();
        MemoryTransaction {
            state: Arc::clone(&self.state),
            snapshot: Arc::clone(&state.entries),
            snapshot_seq: state.seq,
            reads: Vec::new(),
            overlay: BTreeMap::new(),
            read_only,
        }
    }
}

enum ReadRecord {
    Key(Vec<u8>),
    Range(KeyRange),
}

/// A transaction over a [`MemoryStore`].
pub struct MemoryTransaction {
    state: Arc<Mutex<Committed>>,
    snapshot: Arc<Entries>,
    snapshot_seq: u64,
    reads: Vec<ReadRecord>,
    /// Buffered writes; `None` is a pending delete.
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    read_only: bool,
}

impl MemoryTransaction {
    /// Merged view of the snapshot and this transaction's overlay.
    fn read_range(&self, range: &KeyRange) -> Vec<(Vec<u8>, Vec<u8>)> {
        if range.begin >= range.end {
            return Vec::new();
        }
        let mut merged: Entries = self
            .snapshot
            .range(range.begin.clone()..range.end.clone())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, op) in self.overlay.range(range.begin.clone()..range.end.clone()) {
            match op {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }
}

impl Transaction for MemoryTransaction {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.read_only {
            self.reads.push(ReadRecord::Key(key.to_vec()));
        }
        if let Some(op) = self.overlay.get(key) {
            return Ok(op.clone());
        }
        Ok(self.snapshot.get(key).cloned())
    }

    fn get_range(&mut self, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if !self.read_only {
            self.reads.push(ReadRecord::Range(range.clone()));
        }
        Ok(self.read_range(range))
    }

    fn snapshot_range(&mut self, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self.read_range(range))
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.overlay.insert(key.to_vec(), Some(value.to_vec()));
    }

    fn clear(&mut self, key: &[u8]) {
        self.overlay.insert(key.to_vec(), None);
    }

    fn clear_range(&mut self, range: &KeyRange) {
        // Materialize the clear into the overlay so later reads in this
        // transaction observe it.
        let affected: Vec<Vec<u8>> = self
            .read_range(range)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for key in affected {
            self.overlay.insert(key, None);
        }
    }

    fn commit(self) -> Result<()> {
        if self.overlay.is_empty() {
            // Read-only commits cannot conflict.
            return Ok(());
        }
        if self.read_only {
            return Err(Error::ReadOnly);
        }

        let mut state = self.state.lock();
        for read in &self.reads {
            let conflicted = match read {
                ReadRecord::Key(key) => state
                    .key_versions
                    .get(key)
                    .is_some_and(|&seq| seq > self.snapshot_seq),
                ReadRecord::Range(range) => {
                    range.begin < range.end
                        && state
                            .key_versions
                            .range(range.begin.clone()..range.end.clone())
                            .any(|(_, &seq)| seq > self.snapshot_seq)
                }
            };
            if conflicted {
                trace!(
                    snapshot_seq = self.snapshot_seq,
                    committed_seq = state.seq,
                    "commit rejected: read-conflict range was written"
                );
                return Err(Error::CommitConflict);
            }
        }

        state.seq += 1;
        let seq = state.seq;
        let mut entries = (*state.entries).clone();
        for (key, op) in &self.overlay {
            match op {
                Some(value) => {
                    entries.insert(key.clone(), value.clone());
                }
                None => {
                    entries.remove(key);
                }
            }
            state.key_versions.insert(key.clone(), seq);
        }
        state.entries = Arc::new(entries);
        trace!(seq, writes = self.overlay.len(), "commit applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_all() -> KeyRange {
        KeyRange::between(vec![], vec![0xFF; 4])
    }

    #[test]
    fn committed_writes_are_visible() {
        let store = MemoryStore::new();
        let mut txn = store.begin().expect("begin");
        txn.set(b"k", b"v");
        txn.commit().expect("commit");

        let mut txn = store.begin().expect("begin");
        assert_eq!(txn.get(b"k").expect("get"), Some(b"v".to_vec()));
    }

    #[test]
    fn uncommitted_writes_are_invisible_and_drop_aborts() {
        let store = MemoryStore::new();
        {
            let mut txn = store.begin().expect("begin");
            txn.set(b"k", b"v");
            // Dropped without commit.
        }
        let mut txn = store.begin().expect("begin");
        assert_eq!(txn.get(b"k").expect("get"), None);
    }

    #[test]
    fn read_your_writes() {
        let store = MemoryStore::new();
        let mut txn = store.begin().expect("begin");
        txn.set(b"a", b"1");
        assert_eq!(txn.get(b"a").expect("get"), Some(b"1".to_vec()));
        txn.clear(b"a");
        assert_eq!(txn.get(b"a").expect("get"), None);
    }

    #[test]
    fn snapshot_does_not_see_later_commits() {
        let store = MemoryStore::new();
        let mut setup = store.begin().expect("begin");
        setup.set(b"k", b"old");
        setup.commit().expect("commit");

        let mut reader = store.begin_snapshot().expect("begin snapshot");
        let mut writer = store.begin().expect("begin");
        writer.set(b"k", b"new");
        writer.commit().expect("commit");

        assert_eq!(reader.get(b"k").expect("get"), Some(b"old".to_vec()));
    }

    #[test]
    fn conflicting_point_reads_abort_second_committer() {
        let store = MemoryStore::new();
        let mut first = store.begin().expect("begin");
        let mut second = store.begin().expect("begin");

        first.get(b"k").expect("get");
        first.set(b"k", b"first");
        second.get(b"k").expect("get");
        second.set(b"k", b"second");

        first.commit().expect("first commit wins");
        let err = second.commit().expect_err("second commit must conflict");
        assert!(matches!(err, Error::CommitConflict));

        let mut txn = store.begin().expect("begin");
        assert_eq!(txn.get(b"k").expect("get"), Some(b"first".to_vec()));
    }

    #[test]
    fn range_read_conflicts_with_phantom_insert() {
        let store = MemoryStore::new();
        let mut scanner = store.begin().expect("begin");
        let found = scanner.get_range(&range_all()).expect("scan");
        assert!(found.is_empty());
        scanner.set(b"summary", b"empty");

        let mut inserter = store.begin().expect("begin");
        inserter.set(b"new-key", b"v");
        inserter.commit().expect("insert commits");

        let err = scanner.commit().expect_err("scanner must conflict");
        assert!(matches!(err, Error::CommitConflict));
    }

    #[test]
    fn snapshot_range_does_not_conflict() {
        let store = MemoryStore::new();
        let mut scanner = store.begin().expect("begin");
        scanner.snapshot_range(&range_all()).expect("scan");
        scanner.set(b"summary", b"empty");

        let mut inserter = store.begin().expect("begin");
        inserter.set(b"new-key", b"v");
        inserter.commit().expect("insert commits");

        scanner.commit().expect("snapshot scan must not conflict");
    }

    #[test]
    fn disjoint_writers_both_commit() {
        let store = MemoryStore::new();
        let mut a = store.begin().expect("begin");
        let mut b = store.begin().expect("begin");
        a.get(b"a").expect("get");
        a.set(b"a", b"1");
        b.get(b"b").expect("get");
        b.set(b"b", b"2");
        a.commit().expect("commit a");
        b.commit().expect("commit b");
    }

    #[test]
    fn clear_range_removes_committed_and_buffered_keys() {
        let store = MemoryStore::new();
        let mut setup = store.begin().expect("begin");
        setup.set(b"p/1", b"a");
        setup.set(b"p/2", b"b");
        setup.set(b"q/1", b"c");
        setup.commit().expect("commit");

        let mut txn = store.begin().expect("begin");
        txn.set(b"p/3", b"d");
        txn.clear_range(&KeyRange::starts_with(b"p/"));
        txn.commit().expect("commit");

        let mut check = store.begin().expect("begin");
        let remaining = check.get_range(&range_all()).expect("scan");
        assert_eq!(remaining, vec![(b"q/1".to_vec(), b"c".to_vec())]);
    }

    #[test]
    fn writes_through_snapshot_transaction_are_rejected() {
        let store = MemoryStore::new();
        let mut txn = store.begin_snapshot().expect("begin snapshot");
        txn.set(b"k", b"v");
        let err = txn.commit().expect_err("read-only commit with writes");
        assert!(matches!(err, Error::ReadOnly));
    }
}
