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

//! Ordered merge provider with sorted-run spilling.
//!
//! Updates land in a sorted memtable. Once the memtable outgrows its budget it
//! is written to a sorted run file: `u32 length | json (key, slot)` per entry,
//! with a sparse in-memory index of every [`INDEX_INTERVAL`]th key. Lookups
//! check the memtable, then runs from newest to oldest. Draining merges all
//! runs by key, newest version first.
//!
//! Every run keeps an open file, so once [`MAX_RUNS`] runs exist they are
//! merged into a single run holding the newest slot of every key.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, btree_map};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind as IoErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use serde_derive::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::debug;

use super::{MergeKeys, MergeProvider, MergeProviderKind, MergedRecord, draining_error};
use crate::hudi::record_key::RecordKey;
use crate::spec::{Datum, Record};
use crate::{Error, ErrorKind, Result};

const INDEX_INTERVAL: usize = 64;

/// Spilled runs allowed before they are compacted into one.
const MAX_RUNS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Slot {
    Live(MergedRecord),
    // Merged state already looked up by a base row. Never drained.
    Matched(MergedRecord),
}

fn estimated_size(record: &Record) -> usize {
    48 + record
        .values()
        .iter()
        .map(|v| match v {
            Some(Datum::String(s)) => 24 + s.len(),
            Some(Datum::Binary(b)) => 24 + b.len(),
            _ => 16,
        })
        .sum::<usize>()
}

fn read_entry(reader: &mut impl Read) -> Result<Option<(RecordKey, Slot)>> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len) {
        Ok(()) => {}
        Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let mut buf = vec![0u8; u32::from_be_bytes(len) as usize];
    reader.read_exact(&mut buf)?;
    Ok(Some(serde_json::from_slice(&buf)?))
}

/// One spilled, sorted run.
struct SortedRun {
    path: PathBuf,
    file: File,
    index: Vec<(RecordKey, u64)>,
}

impl SortedRun {
    /// Writes `entries`, which must be sorted by key.
    fn write(
        path: PathBuf,
        entries: impl IntoIterator<Item = Result<(RecordKey, Slot)>>,
    ) -> Result<Self> {
        let mut writer = BufWriter::new(File::create(&path)?);
        let mut index = vec![];
        let mut offset = 0u64;
        for (i, entry) in entries.into_iter().enumerate() {
            let entry = entry?;
            if i % INDEX_INTERVAL == 0 {
                index.push((entry.0.clone(), offset));
            }
            let buf = serde_json::to_vec(&entry)?;
            let len = u32::try_from(buf.len())?;
            writer.write_all(&len.to_be_bytes())?;
            writer.write_all(&buf)?;
            offset += 4 + buf.len() as u64;
        }
        writer.flush()?;
        drop(writer);

        Ok(Self {
            file: File::open(&path)?,
            path,
            index,
        })
    }

    fn get(&mut self, key: &RecordKey) -> Result<Option<Slot>> {
        let block = self.index.partition_point(|(k, _)| k <= key);
        if block == 0 {
            return Ok(None);
        }
        self.file.seek(SeekFrom::Start(self.index[block - 1].1))?;
        let mut reader = BufReader::new(&self.file);
        for _ in 0..INDEX_INTERVAL {
            match read_entry(&mut reader)? {
                Some((k, slot)) if &k == key => return Ok(Some(slot)),
                Some((k, _)) if &k > key => return Ok(None),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
        Ok(None)
    }

    fn cursor(&self) -> Result<RunCursor> {
        Ok(RunCursor {
            reader: BufReader::new(File::open(&self.path)?),
        })
    }

    fn remove(self) -> Result<()> {
        drop(self.file);
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

struct RunCursor {
    reader: BufReader<File>,
}

impl RunCursor {
    fn next_entry(&mut self) -> Result<Option<(RecordKey, Slot)>> {
        read_entry(&mut self.reader)
    }
}

/// K-way merge over runs. Rank 0 is the newest run; for equal keys the lowest
/// rank wins and the other versions are skipped.
struct RunMerger {
    cursors: Vec<RunCursor>,
    heads: Vec<Option<Slot>>,
    heap: BinaryHeap<Reverse<(RecordKey, usize)>>,
}

impl RunMerger {
    fn new(runs: &[SortedRun]) -> Result<Self> {
        let mut merger = Self {
            cursors: runs
                .iter()
                .rev()
                .map(SortedRun::cursor)
                .collect::<Result<Vec<_>>>()?,
            heads: vec![None; runs.len()],
            heap: BinaryHeap::with_capacity(runs.len()),
        };
        for rank in 0..merger.cursors.len() {
            merger.advance(rank)?;
        }
        Ok(merger)
    }

    fn advance(&mut self, rank: usize) -> Result<()> {
        if let Some((key, slot)) = self.cursors[rank].next_entry()? {
            self.heads[rank] = Some(slot);
            self.heap.push(Reverse((key, rank)));
        }
        Ok(())
    }

    /// Newest slot of the next key.
    fn next_slot(&mut self) -> Result<Option<(RecordKey, Slot)>> {
        while let Some(Reverse((key, rank))) = self.heap.pop() {
            let slot = self.heads[rank].take();
            self.advance(rank)?;
            while let Some(Reverse((next_key, _))) = self.heap.peek() {
                if next_key != &key {
                    break;
                }
                if let Some(Reverse((_, older))) = self.heap.pop() {
                    self.heads[older] = None;
                    self.advance(older)?;
                }
            }
            if let Some(slot) = slot {
                return Ok(Some((key, slot)));
            }
        }
        Ok(None)
    }

    fn next_live(&mut self) -> Result<Option<Record>> {
        while let Some((_, slot)) = self.next_slot()? {
            if let Slot::Live(entry) = slot {
                if !entry.deleted {
                    return Ok(Some(entry.record));
                }
            }
        }
        Ok(None)
    }
}

enum Drain {
    Memtable(btree_map::IntoValues<RecordKey, Slot>),
    Runs(RunMerger),
}

/// Merge provider whose state may exceed memory.
pub struct OrderedMergeProvider {
    keys: MergeKeys,
    memtable: BTreeMap<RecordKey, Slot>,
    memtable_bytes: usize,
    memtable_budget: usize,
    spill_root: Option<PathBuf>,
    spill_dir: Option<TempDir>,
    runs: Vec<SortedRun>,
    runs_written: usize,
    compactions: usize,
    drain: Option<Drain>,
}

impl OrderedMergeProvider {
    /// Creates an empty provider spilling once the memtable holds about
    /// `memtable_budget` bytes. Runs are written below `spill_root`, or the
    /// system temp dir.
    pub fn new(keys: MergeKeys, memtable_budget: usize, spill_root: Option<PathBuf>) -> Self {
        Self {
            keys,
            memtable: BTreeMap::new(),
            memtable_bytes: 0,
            memtable_budget,
            spill_root,
            spill_dir: None,
            runs: vec![],
            runs_written: 0,
            compactions: 0,
            drain: None,
        }
    }

    /// Number of runs currently on disk.
    pub fn spilled_runs(&self) -> usize {
        self.runs.len()
    }

    fn lookup(&mut self, key: &RecordKey) -> Result<Option<Slot>> {
        if let Some(slot) = self.memtable.get(key) {
            return Ok(Some(slot.clone()));
        }
        for run in self.runs.iter_mut().rev() {
            if let Some(slot) = run.get(key)? {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    fn insert(&mut self, key: RecordKey, slot: Slot) -> Result<()> {
        self.memtable_bytes += match &slot {
            Slot::Live(entry) => estimated_size(&entry.record),
            Slot::Matched(entry) => estimated_size(&entry.record),
        };
        self.memtable.insert(key, slot);
        if self.memtable_bytes >= self.memtable_budget {
            self.spill()?;
        }
        Ok(())
    }

    fn next_run_path(&mut self) -> Result<PathBuf> {
        let dir = match &self.spill_dir {
            Some(dir) => dir.path().to_path_buf(),
            None => {
                let mut builder = tempfile::Builder::new();
                builder.prefix("merge-spill-");
                let dir = match &self.spill_root {
                    Some(root) => builder.tempdir_in(root)?,
                    None => builder.tempdir()?,
                };
                let path = dir.path().to_path_buf();
                self.spill_dir = Some(dir);
                path
            }
        };
        let path = dir.join(format!("run-{:06}.jsonl", self.runs_written));
        self.runs_written += 1;
        Ok(path)
    }

    fn spill(&mut self) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }
        let path = self.next_run_path()?;
        let entries = std::mem::take(&mut self.memtable);
        debug!(
            run = self.runs.len(),
            entries = entries.len(),
            bytes = self.memtable_bytes,
            "Spilling merge memtable"
        );
        self.runs.push(SortedRun::write(path, entries.into_iter().map(Ok::<_, Error>))?);
        self.memtable_bytes = 0;
        if self.runs.len() >= MAX_RUNS {
            self.compact()?;
        }
        Ok(())
    }

    /// Replaces all runs by one. Deleted and matched slots are kept since
    /// they still shadow updates applied later.
    fn compact(&mut self) -> Result<()> {
        let path = self.next_run_path()?;
        let mut merger = RunMerger::new(&self.runs)?;
        let slots = std::iter::from_fn(|| merger.next_slot().transpose());
        let merged = SortedRun::write(path, slots)?;
        drop(merger);
        debug!(
            runs = self.runs.len(),
            compactions = self.compactions,
            "Compacting spilled runs"
        );
        for run in std::mem::replace(&mut self.runs, vec![merged]) {
            run.remove()?;
        }
        self.compactions += 1;
        Ok(())
    }

    fn apply(&mut self, key: RecordKey, incoming: MergedRecord) -> Result<()> {
        if self.drain.is_some() {
            return Err(draining_error());
        }
        match self.lookup(&key)? {
            Some(Slot::Live(existing)) if !incoming.supersedes(&existing) => Ok(()),
            Some(Slot::Matched(existing)) if !incoming.supersedes(&existing) => Ok(()),
            Some(Slot::Matched(_)) => self.insert(key, Slot::Matched(incoming)),
            _ => self.insert(key, Slot::Live(incoming)),
        }
    }
}

impl MergeProvider for OrderedMergeProvider {
    fn combine_and_update(&mut self, record: Record) -> Result<()> {
        let (key, entry) = self.keys.upsert_entry(record);
        self.apply(key, entry)
    }

    fn update_on_delete(&mut self, record: Record) -> Result<()> {
        let (key, entry) = self.keys.delete_entry(record);
        self.apply(key, entry)
    }

    fn contains(&mut self, base_row: &Record) -> Result<Option<MergedRecord>> {
        if self.drain.is_some() {
            return Err(draining_error());
        }
        let key = self.keys.key_of(base_row);
        match self.lookup(&key)? {
            Some(Slot::Live(entry)) => {
                self.insert(key, Slot::Matched(entry.clone()))?;
                Ok(Some(entry))
            }
            Some(Slot::Matched(entry)) => Ok(Some(entry)),
            None => Ok(None),
        }
    }

    fn next_row(&mut self) -> Result<Option<Record>> {
        if self.drain.is_none() {
            let drain = if self.runs.is_empty() {
                Drain::Memtable(std::mem::take(&mut self.memtable).into_values())
            } else {
                self.spill()?;
                Drain::Runs(RunMerger::new(&self.runs)?)
            };
            self.drain = Some(drain);
        }
        match self.drain.as_mut() {
            Some(Drain::Memtable(values)) => Ok(values.find_map(|slot| match slot {
                Slot::Live(entry) if !entry.deleted => Some(entry.record),
                _ => None,
            })),
            Some(Drain::Runs(merger)) => merger.next_live(),
            None => Err(Error::new(ErrorKind::Unexpected, "Merge drain not initialized")),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.drain = None;
        self.runs.clear();
        self.memtable.clear();
        self.memtable_bytes = 0;
        if let Some(dir) = self.spill_dir.take() {
            dir.close()?;
        }
        Ok(())
    }

    fn kind(&self) -> MergeProviderKind {
        MergeProviderKind::Ordered
    }
}

impl Drop for OrderedMergeProvider {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "Failed to remove merge spill files");
        }
    }
}
