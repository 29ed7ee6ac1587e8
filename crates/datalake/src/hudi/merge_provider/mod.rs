// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Keyed merge state backing the merged log reader.
//!
//! Two variants exist: an in-memory hash table, and an ordered store that
//! spills sorted runs to local disk once its memtable exceeds a budget. The
//! variant is picked once per reader from the total size of its log files.

mod hash;
mod ordered;

use std::fmt;

pub use hash::HashMergeProvider;
pub use ordered::OrderedMergeProvider;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use super::delete_block::DeleteKey;
use super::record_key::{RecordKey, RecordKeyCodec};
use crate::spec::{Datum, PrimitiveType, ReaderProperties, Record, Schema, TableOptions};
use crate::{Error, ErrorKind, Result};

/// Current state of one record key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRecord {
    /// Latest row for the key. For deletes only the key and precombine
    /// columns are set.
    pub record: Record,
    /// Precombine value the row won with.
    pub ordering: Option<Datum>,
    /// Whether the key is deleted.
    pub deleted: bool,
}

impl MergedRecord {
    /// Whether `self`, arriving later, replaces `existing`.
    ///
    /// The larger precombine value wins and the newer row wins ties. A missing
    /// value sorts lowest, except that a delete without one always applies.
    pub fn supersedes(&self, existing: &MergedRecord) -> bool {
        if self.deleted && self.ordering.is_none() {
            return true;
        }
        self.ordering >= existing.ordering
    }
}

/// Key and precombine extraction shared by both providers.
#[derive(Debug, Clone)]
pub struct MergeKeys {
    codec: RecordKeyCodec,
    precombine: Option<(usize, PrimitiveType)>,
    arity: usize,
}

impl MergeKeys {
    /// Resolves the record key and precombine columns of a table.
    pub fn try_new(schema: &Schema, options: &TableOptions) -> Result<Self> {
        let codec = RecordKeyCodec::try_new(schema, &options.record_key_fields)?;
        let precombine = match &options.precombine_field {
            Some(name) => {
                let idx = schema.field_index(name).ok_or_else(|| {
                    Error::new(
                        ErrorKind::ConfigInvalid,
                        format!("Precombine column '{name}' not found in table schema"),
                    )
                })?;
                schema.field(idx).map(|f| (idx, f.field_type))
            }
            None => None,
        };
        Ok(Self {
            codec,
            precombine,
            arity: schema.len(),
        })
    }

    /// Record key codec.
    pub fn codec(&self) -> &RecordKeyCodec {
        &self.codec
    }

    /// Column indices that must be read for merging.
    pub fn required_columns(&self) -> Vec<usize> {
        let mut columns = self.codec.key_indices().to_vec();
        if let Some((idx, _)) = self.precombine {
            columns.push(idx);
        }
        columns
    }

    /// Key of a row.
    pub fn key_of(&self, record: &Record) -> RecordKey {
        self.codec.key_of(record)
    }

    /// Precombine value of a row.
    pub fn ordering_of(&self, record: &Record) -> Option<Datum> {
        self.precombine
            .and_then(|(idx, _)| record.get(idx).cloned())
    }

    /// Builds the synthetic row of a delete: only the key columns and, when
    /// present, the precombine column are set.
    pub fn delete_record(&self, key: &DeleteKey) -> Result<Record> {
        let record_key = self.codec.decode(&key.record_key)?;
        let mut record = Record::new_null(self.arity);
        self.codec.stamp(&record_key, &mut record);
        if let (Some((idx, ty)), Some(ordering)) = (self.precombine, &key.ordering_value) {
            record.set(idx, Some(ordering.clone().coerce(ty)?));
        }
        Ok(record)
    }

    pub(crate) fn upsert_entry(&self, record: Record) -> (RecordKey, MergedRecord) {
        let key = self.key_of(&record);
        let ordering = self.ordering_of(&record);
        (key, MergedRecord {
            record,
            ordering,
            deleted: false,
        })
    }

    pub(crate) fn delete_entry(&self, record: Record) -> (RecordKey, MergedRecord) {
        let key = self.key_of(&record);
        let ordering = self.ordering_of(&record);
        (key, MergedRecord {
            record,
            ordering,
            deleted: true,
        })
    }
}

/// Which provider backs a merged log reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeProviderKind {
    /// In-memory hash table.
    HashTable,
    /// Ordered store spilling sorted runs to disk.
    Ordered,
}

impl MergeProviderKind {
    /// Picks the hash table below `threshold` bytes of logs.
    pub fn select(total_log_bytes: u64, threshold: u64) -> Self {
        if total_log_bytes < threshold {
            Self::HashTable
        } else {
            Self::Ordered
        }
    }
}

impl fmt::Display for MergeProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HashTable => write!(f, "hash-table"),
            Self::Ordered => write!(f, "ordered"),
        }
    }
}

/// Keyed merge state of a merged log reader.
pub trait MergeProvider {
    /// Upserts a row, keeping whichever version has the larger precombine
    /// value.
    fn combine_and_update(&mut self, record: Record) -> Result<()>;

    /// Applies a delete built by [`MergeKeys::delete_record`], with the same
    /// tie-break as upserts.
    fn update_on_delete(&mut self, record: Record) -> Result<()>;

    /// Looks up the merged state of the key of `base_row` and marks the key
    /// matched. A matched key keeps answering lookups, so every base row
    /// sharing it sees the same log state, but [`MergeProvider::next_row`]
    /// only yields keys never matched.
    fn contains(&mut self, base_row: &Record) -> Result<Option<MergedRecord>>;

    /// Drains the remaining live rows. No updates are accepted afterwards.
    fn next_row(&mut self) -> Result<Option<Record>>;

    /// Releases memory and spill files. Safe to call more than once.
    fn close(&mut self) -> Result<()>;

    /// Variant of this provider.
    fn kind(&self) -> MergeProviderKind;
}

/// Creates the provider for a reader over `total_log_bytes` of logs.
pub fn new_merge_provider(
    keys: MergeKeys,
    total_log_bytes: u64,
    properties: &ReaderProperties,
) -> Result<Box<dyn MergeProvider>> {
    let kind = MergeProviderKind::select(total_log_bytes, properties.hash_table_max_log_bytes);
    debug!(
        %kind,
        total_log_bytes,
        threshold = properties.hash_table_max_log_bytes,
        "Selected merge provider"
    );
    Ok(match kind {
        MergeProviderKind::HashTable => Box::new(HashMergeProvider::new(keys)),
        MergeProviderKind::Ordered => Box::new(OrderedMergeProvider::new(
            keys,
            properties.spill_memtable_bytes,
            properties.spill_dir.clone(),
        )),
    })
}

pub(crate) fn draining_error() -> Error {
    Error::new(
        ErrorKind::Unexpected,
        "Merge provider no longer accepts updates once draining started",
    )
}
