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

use std::collections::HashMap;
use std::collections::hash_map::IntoValues;

use super::{MergeKeys, MergeProvider, MergeProviderKind, MergedRecord, draining_error};
use crate::hudi::record_key::RecordKey;
use crate::spec::Record;
use crate::Result;

struct Entry {
    merged: MergedRecord,
    matched: bool,
}

/// In-memory merge provider. Bounded by process memory.
pub struct HashMergeProvider {
    keys: MergeKeys,
    entries: HashMap<RecordKey, Entry>,
    drain: Option<IntoValues<RecordKey, Entry>>,
}

impl HashMergeProvider {
    /// Creates an empty provider.
    pub fn new(keys: MergeKeys) -> Self {
        Self {
            keys,
            entries: HashMap::new(),
            drain: None,
        }
    }

    fn apply(&mut self, key: RecordKey, incoming: MergedRecord) -> Result<()> {
        if self.drain.is_some() {
            return Err(draining_error());
        }
        match self.entries.get_mut(&key) {
            Some(existing) => {
                if incoming.supersedes(&existing.merged) {
                    existing.merged = incoming;
                }
            }
            None => {
                self.entries.insert(key, Entry {
                    merged: incoming,
                    matched: false,
                });
            }
        }
        Ok(())
    }
}

impl MergeProvider for HashMergeProvider {
    fn combine_and_update(&mut self, record: Record) -> Result<()> {
        let (key, entry) = self.keys.upsert_entry(record);
        self.apply(key, entry)
    }

    fn update_on_delete(&mut self, record: Record) -> Result<()> {
        let (key, entry) = self.keys.delete_entry(record);
        self.apply(key, entry)
    }

    fn contains(&mut self, base_row: &Record) -> Result<Option<MergedRecord>> {
        Ok(self
            .entries
            .get_mut(&self.keys.key_of(base_row))
            .map(|entry| {
                entry.matched = true;
                entry.merged.clone()
            }))
    }

    fn next_row(&mut self) -> Result<Option<Record>> {
        let drain = self
            .drain
            .get_or_insert_with(|| std::mem::take(&mut self.entries).into_values());
        Ok(drain
            .find(|entry| !entry.matched && !entry.merged.deleted)
            .map(|entry| entry.merged.record))
    }

    fn close(&mut self) -> Result<()> {
        self.entries = HashMap::new();
        self.drain = None;
        Ok(())
    }

    fn kind(&self) -> MergeProviderKind {
        MergeProviderKind::HashTable
    }
}
