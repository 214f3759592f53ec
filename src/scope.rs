//! Ownership scoping for the vision → goal → task chain.
//!
//! Every record lives under exactly one parent key. Records are stored in a
//! Sled tree keyed `parent_id ‖ id` (big-endian), so a prefix scan yields a
//! parent's children in id order and a point lookup with the wrong parent
//! simply misses. A second tree maps `id → parent_id` for existence checks
//! that only know the child id (creating a goal under a vision id, say).
//!
//! Writes that depend on another key run in a single Sled transaction: an
//! insert re-reads its parent's index entry, an update re-reads its own
//! record, and a removal drops the record and its index entry together. A
//! delete racing an insert or update therefore either wins cleanly or loses
//! cleanly; it never leaves a child under a vanished parent.

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{abort, ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional};

use crate::models::{Goal, Task, Vision};
use crate::storage::StoreError;

/// A record that belongs to a single parent and carries a name that must be
/// unique among its siblings.
pub trait ScopedRecord: Serialize + DeserializeOwned {
    fn id(&self) -> u64;
    fn parent_id(&self) -> u64;
    fn name(&self) -> &str;
    fn finished(&self) -> bool;
}

impl ScopedRecord for Vision {
    fn id(&self) -> u64 {
        self.id
    }
    fn parent_id(&self) -> u64 {
        self.user_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn finished(&self) -> bool {
        self.finished
    }
}

impl ScopedRecord for Goal {
    fn id(&self) -> u64 {
        self.id
    }
    fn parent_id(&self) -> u64 {
        self.vision_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn finished(&self) -> bool {
        self.finished
    }
}

impl ScopedRecord for Task {
    fn id(&self) -> u64 {
        self.id
    }
    fn parent_id(&self) -> u64 {
        self.goal_id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn finished(&self) -> bool {
        self.finished
    }
}

/// Listing predicate. Search is a case-sensitive substring match on the name;
/// `finished` is an exact match on the stored flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListFilter {
    All,
    Search(String),
    Finished(bool),
    FinishedAndSearch { finished: bool, search: String },
}

impl ListFilter {
    pub fn new(finished: Option<bool>, search: Option<String>) -> Self {
        match (finished, search) {
            (None, None) => ListFilter::All,
            (None, Some(search)) => ListFilter::Search(search),
            (Some(finished), None) => ListFilter::Finished(finished),
            (Some(finished), Some(search)) => ListFilter::FinishedAndSearch { finished, search },
        }
    }

    /// The finished value the caller asked for, if any.
    pub fn finished(&self) -> Option<bool> {
        match self {
            ListFilter::Finished(finished) | ListFilter::FinishedAndSearch { finished, .. } => {
                Some(*finished)
            }
            ListFilter::All | ListFilter::Search(_) => None,
        }
    }

    pub fn matches(&self, name: &str, finished: bool) -> bool {
        match self {
            ListFilter::All => true,
            ListFilter::Search(search) => name.contains(search.as_str()),
            ListFilter::Finished(wanted) => finished == *wanted,
            ListFilter::FinishedAndSearch { finished: wanted, search } => {
                finished == *wanted && name.contains(search.as_str())
            }
        }
    }
}

fn scoped_key(parent_id: u64, id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&parent_id.to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

pub(crate) fn decode_u64(bytes: &[u8]) -> Result<u64, StoreError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| StoreError::CorruptKey)?;
    Ok(u64::from_be_bytes(raw))
}

/// Parent-scoped collection of one record kind.
pub struct ScopedTree<R> {
    records: sled::Tree,
    owners: sled::Tree,
    _kind: PhantomData<fn() -> R>,
}

impl<R> Clone for ScopedTree<R> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
            owners: self.owners.clone(),
            _kind: PhantomData,
        }
    }
}

impl<R: ScopedRecord> ScopedTree<R> {
    pub(crate) fn open(db: &Db, kind: &str) -> Result<Self, StoreError> {
        Ok(Self {
            records: db.open_tree(kind)?,
            owners: db.open_tree(format!("{kind}_owners"))?,
            _kind: PhantomData,
        })
    }

    /// True if a sibling under `parent_id` already uses `name`. With
    /// `exclude_id` set, that record itself is ignored (renaming to the
    /// current name is not a conflict).
    pub fn exists_by_name(
        &self,
        name: &str,
        parent_id: u64,
        exclude_id: Option<u64>,
    ) -> Result<bool, StoreError> {
        for record in self.children(parent_id) {
            let record = record?;
            if record.name() == name && Some(record.id()) != exclude_id {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// True only if `id` exists *and* belongs to `parent_id`.
    pub fn exists_by_id(&self, id: u64, parent_id: u64) -> Result<bool, StoreError> {
        Ok(self.records.contains_key(scoped_key(parent_id, id))?)
    }

    pub fn owner_of(&self, id: u64) -> Result<Option<u64>, StoreError> {
        self.owners
            .get(id.to_be_bytes())?
            .map(|parent| decode_u64(&parent))
            .transpose()
    }

    pub fn get(&self, id: u64, parent_id: u64) -> Result<Option<R>, StoreError> {
        match self.records.get(scoped_key(parent_id, id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Children of `parent_id` matching `filter`, in id order.
    pub fn list(&self, parent_id: u64, filter: &ListFilter) -> Result<Vec<R>, StoreError> {
        let mut matched = Vec::new();
        for record in self.children(parent_id) {
            let record = record?;
            if filter.matches(record.name(), record.finished()) {
                matched.push(record);
            }
        }
        Ok(matched)
    }

    pub fn ids_under(&self, parent_id: u64) -> Result<Vec<u64>, StoreError> {
        self.records
            .scan_prefix(parent_id.to_be_bytes())
            .keys()
            .map(|key| decode_u64(&key?[8..]))
            .collect()
    }

    /// The `id -> parent_id` index. Children of this kind check it when
    /// they are inserted.
    pub(crate) fn index(&self) -> &sled::Tree {
        &self.owners
    }

    /// Inserts `record` at its scoped key, provided `parent_index` still holds
    /// the record's parent id when the transaction commits.
    pub(crate) fn insert_under(
        &self,
        parent_index: &sled::Tree,
        record: &R,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        let key = scoped_key(record.parent_id(), record.id());
        let id = record.id().to_be_bytes();
        let parent = record.parent_id().to_be_bytes();
        (parent_index, &self.records, &self.owners)
            .transaction(
                |(parents, records, owners)| -> ConflictableTransactionResult<(), StoreError> {
                    if parents.get(&parent[..])?.is_none() {
                        return abort(StoreError::MissingParent);
                    }
                    records.insert(&key[..], bytes.as_slice())?;
                    owners.insert(&id[..], &parent[..])?;
                    Ok(())
                },
            )
            .map_err(from_transaction)
    }

    /// Applies `change` to the record at `id` under `parent_id` and writes it
    /// back. `None` if the record is missing, including when a removal
    /// commits first.
    pub(crate) fn update(
        &self,
        id: u64,
        parent_id: u64,
        change: impl Fn(&mut R),
    ) -> Result<Option<R>, StoreError> {
        let key = scoped_key(parent_id, id);
        self.records
            .transaction(|records| -> ConflictableTransactionResult<Option<R>, StoreError> {
                let Some(bytes) = records.get(&key[..])? else {
                    return Ok(None);
                };
                let mut record: R = serde_json::from_slice(&bytes)
                    .or_else(|err| abort(StoreError::Codec(err)))?;
                change(&mut record);
                let bytes =
                    serde_json::to_vec(&record).or_else(|err| abort(StoreError::Codec(err)))?;
                records.insert(&key[..], bytes)?;
                Ok(Some(record))
            })
            .map_err(from_transaction)
    }

    /// Removes the record and its index entry if it lives under `parent_id`.
    /// Descendants are the caller's concern; once this returns `true` no new
    /// child can be inserted under `id`.
    pub(crate) fn remove(&self, id: u64, parent_id: u64) -> Result<bool, StoreError> {
        let key = scoped_key(parent_id, id);
        let id = id.to_be_bytes();
        (&self.records, &self.owners)
            .transaction(|(records, owners)| -> ConflictableTransactionResult<bool, StoreError> {
                if records.remove(&key[..])?.is_none() {
                    return Ok(false);
                }
                owners.remove(&id[..])?;
                Ok(true)
            })
            .map_err(from_transaction)
    }

    fn children(&self, parent_id: u64) -> impl Iterator<Item = Result<R, StoreError>> {
        self.records
            .scan_prefix(parent_id.to_be_bytes())
            .values()
            .map(|value| -> Result<R, StoreError> { Ok(serde_json::from_slice(&value?)?) })
    }
}

pub(crate) fn from_transaction(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Storage(err) => StoreError::Sled(err),
        TransactionError::Abort(err) => err,
    }
}
