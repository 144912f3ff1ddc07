//! Timeout persistence with time-ordered and owner-grouping indexes.
//!
//! A timeout record keeps four entries, created and destroyed together in
//! one transaction: the payload at `(id)`, a reverse lookup `(id, "Time") →
//! millis`, an owner-membership entry `(owner, id) → ∅`, and a time-index
//! entry `("ByTime", millis, id) → id`. The time index is keyed by
//! `(time, id)` so entries with equal due times order deterministically by
//! id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::codec::{PayloadCodec, Postcard};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::keys::{Element, KeyRange, Subspace};
use crate::store::{Store, Transaction};

const TIME_INDEX: &str = "ByTime";
const REVERSE_TIME: &str = "Time";

/// A scheduled wake-up request tied to an owning saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutRecord {
    /// Caller-supplied unique id.
    pub id: String,
    /// Surrogate id of the owning saga.
    pub owner: Uuid,
    /// When the timeout fires.
    pub due_at: DateTime<Utc>,
    /// Opaque message payload delivered when the timeout fires.
    pub body: Vec<u8>,
}

/// Persister for timeout records.
pub struct TimeoutPersister<S: Store, C: PayloadCodec = Postcard, K: Clock = SystemClock> {
    store: S,
    subspace: Subspace,
    codec: C,
    clock: K,
}

impl<S: Store, K: Clock> TimeoutPersister<S, Postcard, K> {
    /// Create a persister with the default codec.
    pub fn new(store: S, config: &ConnectionConfig, clock: K) -> Self {
        Self::with_codec(store, config, Postcard, clock)
    }
}

impl<S: Store, C: PayloadCodec, K: Clock> TimeoutPersister<S, C, K> {
    /// Create a persister with an explicit codec.
    pub fn with_codec(store: S, config: &ConnectionConfig, codec: C, clock: K) -> Self {
        TimeoutPersister {
            store,
            subspace: config.timeout_subspace(),
            codec,
            clock,
        }
    }

    /// Store a timeout and its three index entries.
    ///
    /// Fails with `TimeoutExists` when a record with this id is already
    /// stored; nothing is written in that case.
    pub fn add(&self, timeout: &TimeoutRecord) -> Result<()> {
        let mut txn = self.store.begin()?;
        let payload_key = self.payload_key(&timeout.id);
        if txn.get(&payload_key)?.is_some() {
            return Err(Error::TimeoutExists {
                id: timeout.id.clone(),
            });
        }

        let millis = timeout.due_at.timestamp_millis();
        txn.set(&payload_key, &self.codec.encode(timeout)?);
        txn.set(&self.reverse_time_key(&timeout.id), &millis.to_be_bytes());
        txn.set(&self.owner_key(timeout.owner, &timeout.id), &[]);
        txn.set(
            &self.time_index_key(millis, &timeout.id),
            timeout.id.as_bytes(),
        );
        txn.commit()?;

        debug!(id = %timeout.id, owner = %timeout.owner, due_at = %timeout.due_at, "added timeout");
        Ok(())
    }

    /// Return the timeouts due in `[start_cursor, now)` in due order, plus
    /// the cursor for the next poll.
    ///
    /// `now` comes from the injected clock, so the window never includes
    /// the current instant itself. The next cursor is the due time of the
    /// last returned entry, or the unchanged `start_cursor` when nothing
    /// was found — an idle polling loop re-scans the same window. The scan
    /// is a snapshot read and never conflicts with concurrent inserts.
    pub fn next_chunk(
        &self,
        start_cursor: DateTime<Utc>,
    ) -> Result<(Vec<(String, DateTime<Utc>)>, DateTime<Utc>)> {
        let now = self.clock.now();
        let range = KeyRange::between(
            self.time_index_key(start_cursor.timestamp_millis(), ""),
            self.time_index_key(now.timestamp_millis(), ""),
        );

        let mut txn = self.store.begin_snapshot()?;
        let entries = txn.snapshot_range(&range)?;

        let mut due = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let id = String::from_utf8(value).map_err(|_| Error::Corrupted {
                reason: "time-index entry value is not valid UTF-8".to_string(),
            })?;
            due.push((id, self.decode_index_time(&key)?));
        }

        let next_cursor = due.last().map(|(_, time)| *time).unwrap_or(start_cursor);
        Ok((due, next_cursor))
    }

    /// Remove a timeout by id, returning the stored record.
    ///
    /// Returns `Ok(None)` when no such timeout exists. The time-index
    /// entry's due time is recovered through the reverse-time entry, never
    /// taken from the caller.
    pub fn try_remove(&self, id: &str) -> Result<Option<TimeoutRecord>> {
        let mut txn = self.store.begin()?;
        let payload_key = self.payload_key(id);
        let Some(bytes) = txn.get(&payload_key)? else {
            return Ok(None);
        };
        let record: TimeoutRecord = self.codec.decode(&bytes)?;

        txn.clear(&payload_key);
        txn.clear(&self.owner_key(record.owner, id));
        self.clear_time_entries(&mut txn, id)?;
        txn.commit()?;

        debug!(%id, "removed timeout");
        Ok(Some(record))
    }

    /// Remove every timeout belonging to one saga.
    ///
    /// Walks the owner-membership prefix, clears each timeout's payload and
    /// time entries, then clears the whole membership range in one range
    /// clear. Timeouts of other owners are untouched.
    pub fn remove_all_for_owner(&self, owner: Uuid) -> Result<()> {
        let mut txn = self.store.begin()?;
        let range = self.subspace.range(&[Element::Uuid(owner)]);
        let members = txn.get_range(&range)?;
        let count = members.len();

        for (key, _) in members {
            let id = self.decode_member_id(&key)?;
            txn.clear(&self.payload_key(&id));
            self.clear_time_entries(&mut txn, &id)?;
        }
        txn.clear_range(&range);
        txn.commit()?;

        debug!(%owner, count, "removed timeouts for owner");
        Ok(())
    }

    /// Clear the time-index entry (locating it via the reverse-time entry)
    /// and the reverse-time entry itself.
    fn clear_time_entries(&self, txn: &mut S::Txn, id: &str) -> Result<()> {
        let reverse_key = self.reverse_time_key(id);
        let Some(bytes) = txn.get(&reverse_key)? else {
            return Err(Error::Corrupted {
                reason: format!("reverse-time entry missing for timeout {id:?}"),
            });
        };
        let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| Error::Corrupted {
            reason: format!("reverse-time entry for timeout {id:?} is malformed"),
        })?;
        let millis = i64::from_be_bytes(raw);

        txn.clear(&self.time_index_key(millis, id));
        txn.clear(&reverse_key);
        Ok(())
    }

    fn payload_key(&self, id: &str) -> Vec<u8> {
        self.subspace.pack(&[Element::Str(id.to_string())])
    }

    fn reverse_time_key(&self, id: &str) -> Vec<u8> {
        self.subspace.pack(&[
            Element::Str(id.to_string()),
            Element::Str(REVERSE_TIME.to_string()),
        ])
    }

    fn owner_key(&self, owner: Uuid, id: &str) -> Vec<u8> {
        self.subspace
            .pack(&[Element::Uuid(owner), Element::Str(id.to_string())])
    }

    fn time_index_key(&self, millis: i64, id: &str) -> Vec<u8> {
        self.subspace.pack(&[
            Element::Str(TIME_INDEX.to_string()),
            Element::I64(millis),
            Element::Str(id.to_string()),
        ])
    }

    fn decode_index_time(&self, key: &[u8]) -> Result<DateTime<Utc>> {
        let elements = self.subspace.unpack(key)?;
        let Some(Element::I64(millis)) = elements.get(1) else {
            return Err(Error::Corrupted {
                reason: "time-index key has no time component".to_string(),
            });
        };
        DateTime::from_timestamp_millis(*millis).ok_or_else(|| Error::Corrupted {
            reason: format!("time-index key holds out-of-range time {millis}"),
        })
    }

    fn decode_member_id(&self, key: &[u8]) -> Result<String> {
        let elements = self.subspace.unpack(key)?;
        match elements.last() {
            Some(Element::Str(id)) => Ok(id.clone()),
            _ => Err(Error::Corrupted {
                reason: "owner-membership key has no timeout id component".to_string(),
            }),
        }
    }
}
