//! Saga persistence with optimistic concurrency and unique-field indexes.
//!
//! A saga record lives at `(type name, id)` with its version counter at a
//! `"version"`-suffixed key; each declared-unique field keeps a
//! `(type name + "By" + field, value) → id` mapping in the same namespace.
//! All writes for one save happen in one transaction, and every key whose
//! concurrent mutation must abort the save is read first to register it in
//! the transaction's conflict range.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::codec::{PayloadCodec, Postcard};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::keys::{pack, Element, KeyRange, Subspace};
use crate::store::{Store, Transaction};

/// A declared-unique field value.
///
/// Owned data with derived equality, so old-vs-new comparisons on update
/// are always value comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// String-valued business key.
    Str(String),
    /// Uuid-valued business key.
    Uuid(Uuid),
    /// Integer-valued business key.
    I64(i64),
}

impl FieldValue {
    fn to_element(&self) -> Element {
        match self {
            FieldValue::Str(s) => Element::Str(s.clone()),
            FieldValue::Uuid(id) => Element::Uuid(*id),
            FieldValue::I64(v) => Element::I64(*v),
        }
    }
}

/// Schema contract for a saga state type.
///
/// Replaces attribute-driven reflection with an explicit descriptor: the
/// type names itself, exposes its surrogate id, and enumerates its
/// declared-unique fields by name and current value.
pub trait SagaState: Serialize + DeserializeOwned {
    /// Entity type name used in primary and index keys.
    const TYPE_NAME: &'static str;

    /// Globally unique surrogate id.
    fn id(&self) -> Uuid;

    /// Declared-unique fields with their current values.
    fn unique_fields(&self) -> Vec<(&'static str, FieldValue)> {
        Vec::new()
    }
}

/// Version and unique-field values captured when a saga instance was loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaMetadata {
    /// Stored version at load time.
    pub version: u64,
    /// Unique-field values at load time, used to clear stale index entries.
    pub unique_values: BTreeMap<&'static str, FieldValue>,
}

/// A saga state together with its load-time metadata.
///
/// `get` returns a wrapper carrying metadata; a wrapper built with
/// [`Saga::new`] carries none and saves as a fresh insert. The metadata is
/// the basis for optimistic concurrency: save compares the stored version
/// against the version captured when *this* wrapper was loaded.
#[derive(Debug, Clone)]
pub struct Saga<T: SagaState> {
    state: T,
    meta: Option<SagaMetadata>,
}

impl<T: SagaState> Saga<T> {
    /// Wrap a never-persisted state; the next save is an insert at version 0.
    pub fn new(state: T) -> Self {
        Saga { state, meta: None }
    }

    /// The saga state.
    pub fn state(&self) -> &T {
        &self.state
    }

    /// Mutable access to the saga state.
    pub fn state_mut(&mut self) -> &mut T {
        &mut self.state
    }

    /// Version captured at load time, if this wrapper was loaded.
    pub fn version(&self) -> Option<u64> {
        self.meta.as_ref().map(|meta| meta.version)
    }

    /// Unwrap the state.
    pub fn into_state(self) -> T {
        self.state
    }
}

/// Persister for saga records.
pub struct SagaPersister<S: Store, C: PayloadCodec = Postcard> {
    store: S,
    subspace: Subspace,
    codec: C,
}

impl<S: Store> SagaPersister<S> {
    /// Create a persister with the default codec.
    pub fn new(store: S, config: &ConnectionConfig) -> Self {
        Self::with_codec(store, config, Postcard)
    }
}

impl<S: Store, C: PayloadCodec> SagaPersister<S, C> {
    /// Create a persister with an explicit codec.
    pub fn with_codec(store: S, config: &ConnectionConfig, codec: C) -> Self {
        SagaPersister {
            store,
            subspace: config.saga_subspace(),
            codec,
        }
    }

    /// Save a saga in its own transaction.
    ///
    /// Fresh wrappers insert at version 0; loaded wrappers require the
    /// stored version to equal the captured one and bump it by exactly 1.
    /// On success the wrapper's metadata is refreshed, so the same wrapper
    /// can be saved again without re-loading.
    pub fn save<T: SagaState>(&self, saga: &mut Saga<T>) -> Result<()> {
        let mut txn = self.store.begin()?;
        let meta = self.save_in(&mut txn, saga)?;
        txn.commit()?;
        saga.meta = Some(meta);
        Ok(())
    }

    /// Perform a save's reads and writes inside a caller-owned transaction.
    ///
    /// The caller commits; on success the returned metadata describes the
    /// state as stored (new version and unique values) and should replace
    /// the wrapper's metadata for any further save of the same instance.
    pub fn save_in<T: SagaState>(
        &self,
        txn: &mut S::Txn,
        saga: &Saga<T>,
    ) -> Result<SagaMetadata> {
        let id = saga.state.id();
        let id_key = self.saga_key::<T>(id);
        let version_key = version_key(&id_key);

        // Result discarded: registers the primary key in the conflict range
        // so a concurrent writer to this saga aborts one of the commits.
        txn.get(&id_key)?;

        txn.set(&id_key, &self.codec.encode(&saga.state)?);

        let version_to_store = match &saga.meta {
            Some(meta) => {
                let current = match txn.get(&version_key)? {
                    Some(bytes) => Some(decode_version(&bytes)?),
                    None => None,
                };
                if current != Some(meta.version) {
                    return Err(Error::ConcurrencyViolation {
                        expected: meta.version,
                        found: current,
                    });
                }
                meta.version + 1
            }
            None => 0,
        };

        let mut version_bytes = [0u8; 8];
        BigEndian::write_u64(&mut version_bytes, version_to_store);
        txn.set(&version_key, &version_bytes);

        let mut unique_values = BTreeMap::new();
        for (name, value) in saga.state.unique_fields() {
            let new_key = self.unique_key::<T>(name, &value);
            // Registers the claim on this value; two transactions claiming
            // the same value cannot both commit.
            txn.get(&new_key)?;
            txn.set(&new_key, id.as_bytes());

            if let Some(meta) = &saga.meta {
                if let Some(old_value) = meta.unique_values.get(name) {
                    if old_value != &value {
                        txn.clear(&self.unique_key::<T>(name, old_value));
                    }
                }
            }
            unique_values.insert(name, value);
        }

        debug!(
            saga_type = T::TYPE_NAME,
            %id,
            version = version_to_store,
            "saving saga"
        );
        Ok(SagaMetadata {
            version: version_to_store,
            unique_values,
        })
    }

    /// Load a saga by its surrogate id.
    ///
    /// Absence is an error for by-id lookups.
    pub fn get<T: SagaState>(&self, id: Uuid) -> Result<Saga<T>> {
        let mut txn = self.store.begin_snapshot()?;
        self.get_in(&mut txn, id)
    }

    /// Load a saga by a declared-unique field value.
    ///
    /// Returns `Ok(None)` when no mapping exists or the mapping holds the
    /// nil-uuid sentinel.
    pub fn get_by_unique<T: SagaState>(
        &self,
        property: &str,
        value: &FieldValue,
    ) -> Result<Option<Saga<T>>> {
        let mut txn = self.store.begin_snapshot()?;
        let Some(bytes) = txn.get(&self.unique_key::<T>(property, value))? else {
            return Ok(None);
        };
        let id = decode_id(&bytes)?;
        if id.is_nil() {
            return Ok(None);
        }
        self.get_in(&mut txn, id).map(Some)
    }

    fn get_in<T: SagaState>(&self, txn: &mut S::Txn, id: Uuid) -> Result<Saga<T>> {
        let id_key = self.saga_key::<T>(id);
        let items = txn.get_range(&KeyRange::starts_with(&id_key))?;
        // Exactly the payload and its version entry.
        if items.len() != 2 {
            return Err(Error::SagaNotFound { id });
        }
        let state: T = self.codec.decode(&items[0].1)?;
        let version = decode_version(&items[1].1)?;
        let unique_values = state.unique_fields().into_iter().collect();
        Ok(Saga {
            state,
            meta: Some(SagaMetadata {
                version,
                unique_values,
            }),
        })
    }

    fn saga_key<T: SagaState>(&self, id: Uuid) -> Vec<u8> {
        self.subspace.pack(&[
            Element::Str(T::TYPE_NAME.to_string()),
            Element::Uuid(id),
        ])
    }

    fn unique_key<T: SagaState>(&self, property: &str, value: &FieldValue) -> Vec<u8> {
        self.subspace.pack(&[
            Element::Str(format!("{}By{}", T::TYPE_NAME, property)),
            value.to_element(),
        ])
    }
}

fn version_key(id_key: &[u8]) -> Vec<u8> {
    let mut key = id_key.to_vec();
    key.extend_from_slice(&pack(&[Element::Str("version".to_string())]));
    key
}

fn decode_version(bytes: &[u8]) -> Result<u64> {
    if bytes.len() != 8 {
        return Err(Error::Corrupted {
            reason: format!("version entry has {} bytes, expected 8", bytes.len()),
        });
    }
    Ok(BigEndian::read_u64(bytes))
}

fn decode_id(bytes: &[u8]) -> Result<Uuid> {
    let raw: [u8; 16] = bytes.try_into().map_err(|_| Error::Corrupted {
        reason: format!("unique index entry has {} bytes, expected 16", bytes.len()),
    })?;
    Ok(Uuid::from_bytes(raw))
}
