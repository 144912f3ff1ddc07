//! Transactional store contract.
//!
//! The persisters are written against this contract rather than a concrete
//! engine. The store must provide snapshot-isolated reads, atomic multi-key
//! commit, and conflict detection: a commit fails with
//! [`Error::CommitConflict`](crate::Error::CommitConflict) if any key in the
//! transaction's accumulated read-conflict range was written by another
//! transaction that committed first.
//!
//! The read-before-write pattern the persisters use is deliberate protocol:
//! issuing a read of a key (even with the result discarded) registers it in
//! the conflict range so concurrent writers to that key cannot both commit.

use crate::error::Result;
use crate::keys::KeyRange;

/// One store transaction: a bounded sequence of reads and buffered writes,
/// applied atomically at commit.
///
/// Dropping a transaction without committing aborts it; nothing buffered
/// becomes visible.
pub trait Transaction {
    /// Point read. Registers the key in the read-conflict range.
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Ascending range read over `[begin, end)`. Registers the whole range
    /// in the read-conflict range.
    fn get_range(&mut self, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Ascending range read that does NOT register a conflict range.
    ///
    /// Used where concurrent insertion into the scanned window must not
    /// abort this transaction (the polling time-index scan).
    fn snapshot_range(&mut self, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Buffer a point write.
    fn set(&mut self, key: &[u8], value: &[u8]);

    /// Buffer a point delete.
    fn clear(&mut self, key: &[u8]);

    /// Buffer deletion of every key in `[begin, end)`.
    fn clear_range(&mut self, range: &KeyRange);

    /// Atomically apply all buffered writes.
    ///
    /// Fails with `CommitConflict` when the store's conflict detection
    /// rejects the transaction; the caller owns retry policy.
    fn commit(self) -> Result<()>;
}

/// Handle to a transactional ordered key-value store.
pub trait Store: Clone + Send + Sync + 'static {
    /// The transaction type this store produces.
    type Txn: Transaction;

    /// Begin a read-write transaction.
    fn begin(&self) -> Result<Self::Txn>;

    /// Begin a read-only transaction over a consistent snapshot.
    ///
    /// Reads through a snapshot transaction never register conflict ranges;
    /// writes are rejected.
    fn begin_snapshot(&self) -> Result<Self::Txn>;
}
