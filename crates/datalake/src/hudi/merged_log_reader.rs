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

//! Replays one or more delta logs into a merge provider.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use super::data_block::data_block_rows;
use super::delete_block::decode_delete_block;
use super::log_format::{LogBlock, LogBlockType};
use super::log_reader::LogBlockReader;
use super::merge_provider::{
    MergeKeys, MergeProvider, MergeProviderKind, MergedRecord, new_merge_provider,
};
use super::timeline::InstantFilter;
use crate::io::ScopedFileIO;
use crate::reader::{DefaultFormatReaderFactory, FormatReaderFactory, ReadRequest, RowReader};
use crate::spec::{FileFragment, Projection, ReaderProperties, Record, SchemaRef};
use crate::{Error, ErrorKind, Result};

/// Counters of one log replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogScanStats {
    /// Blocks read from all files, corrupted ones included.
    pub blocks_read: usize,
    /// Corrupted blocks found.
    pub corrupted_blocks: usize,
    /// Blocks skipped because their commit is not completed.
    pub discarded_blocks: usize,
    /// Queued blocks removed by rollback commands.
    pub rolled_back_blocks: usize,
    /// Data rows passed to the merge provider.
    pub upserts: usize,
    /// Delete keys passed to the merge provider.
    pub deletes: usize,
    /// Whether replay stopped at a block newer than the target instant.
    pub stopped_early: bool,
}

/// Builder of [`MergedLogRecordReader`].
pub struct MergedLogRecordReaderBuilder {
    io: ScopedFileIO,
    schema: SchemaRef,
    keys: MergeKeys,
    projection: Projection,
    instant_filter: InstantFilter,
    factory: Arc<dyn FormatReaderFactory>,
    properties: ReaderProperties,
}

impl MergedLogRecordReaderBuilder {
    /// Columns decoded from data blocks. Key and precombine columns are
    /// always added.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Which instants may be applied.
    pub fn with_instant_filter(mut self, instant_filter: InstantFilter) -> Self {
        self.instant_filter = instant_filter;
        self
    }

    /// Decoder factory for embedded data files.
    pub fn with_factory(mut self, factory: Arc<dyn FormatReaderFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Reader tunables.
    pub fn with_properties(mut self, properties: ReaderProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Replays `log_files` in order and returns the populated reader.
    pub fn build(self, log_files: &[FileFragment]) -> Result<MergedLogRecordReader> {
        let total_log_bytes = log_files.iter().map(|f| f.file_size_in_bytes).sum();
        let provider = new_merge_provider(self.keys.clone(), total_log_bytes, &self.properties)?;
        let projection = self.projection.with_forced(&self.keys.required_columns());

        let mut reader = MergedLogRecordReader {
            provider: Some(provider),
            keys: self.keys,
            stats: LogScanStats::default(),
        };
        let mut replay = LogReplay {
            io: &self.io,
            request: ReadRequest::whole_file(self.schema, projection),
            instant_filter: &self.instant_filter,
            factory: self.factory.as_ref(),
            properties: &self.properties,
            queue: VecDeque::new(),
        };
        replay.run(&mut reader, log_files)?;
        debug!(stats = ?reader.stats, "Replayed delta logs");
        Ok(reader)
    }
}

struct LogReplay<'a> {
    io: &'a ScopedFileIO,
    request: ReadRequest,
    instant_filter: &'a InstantFilter,
    factory: &'a dyn FormatReaderFactory,
    properties: &'a ReaderProperties,
    // Blocks not yet applied, oldest first.
    queue: VecDeque<LogBlock>,
}

impl LogReplay<'_> {
    fn run(&mut self, reader: &mut MergedLogRecordReader, log_files: &[FileFragment]) -> Result<()> {
        for log_file in log_files {
            let mut blocks = LogBlockReader::open(
                self.io,
                &log_file.file_path,
                self.properties.log_scan_buffer_bytes,
            )?;
            let stop = self.replay_file(reader, &mut blocks)?;
            blocks.close()?;
            if stop {
                reader.stats.stopped_early = true;
                break;
            }
        }
        self.flush(reader)
    }

    /// Returns `true` once a block newer than the target instant is found.
    fn replay_file(
        &mut self,
        reader: &mut MergedLogRecordReader,
        blocks: &mut LogBlockReader,
    ) -> Result<bool> {
        while let Some(block) = blocks.next_block()? {
            reader.stats.blocks_read += 1;
            if block.block_type() == LogBlockType::Corrupted {
                reader.stats.corrupted_blocks += 1;
                self.queue.push_back(block);
                continue;
            }

            let location = block.location().clone();
            let instant = block.instant_time().ok_or_else(|| {
                Error::new(
                    ErrorKind::MalformedMetadata,
                    format!("{} block has no instant time", block.block_type()),
                )
                .with_context("file", location.file_path.clone())
                .with_context("offset", location.offset.to_string())
            })?;

            if self.instant_filter.is_after_target(instant) {
                debug!(
                    file = %location.file_path,
                    offset = location.offset,
                    instant,
                    "Stopping log replay at block newer than target instant"
                );
                return Ok(true);
            }
            if block.block_type() != LogBlockType::Command
                && !self.instant_filter.is_completed(instant)
            {
                debug!(
                    file = %location.file_path,
                    offset = location.offset,
                    instant,
                    "Discarding block of uncommitted instant"
                );
                reader.stats.discarded_blocks += 1;
                continue;
            }

            match block.block_type() {
                LogBlockType::Command => self.apply_command(reader, &block),
                _ => {
                    let current = self
                        .queue
                        .iter()
                        .rev()
                        .find(|b| b.block_type() != LogBlockType::Corrupted)
                        .and_then(LogBlock::instant_time);
                    if current.is_some_and(|current| current != instant) {
                        self.flush(reader)?;
                    }
                    self.queue.push_back(block);
                }
            }
        }
        Ok(false)
    }

    fn apply_command(&mut self, reader: &mut MergedLogRecordReader, block: &LogBlock) {
        if !block.is_rollback() {
            debug!(
                file = %block.location().file_path,
                offset = block.location().offset,
                "Ignoring non-rollback command block"
            );
            return;
        }
        let target = block.target_instant_time();
        let before = self.queue.len();
        self.queue.retain(|queued| {
            queued.block_type() != LogBlockType::Corrupted
                && (target.is_none() || queued.instant_time() != target)
        });
        let removed = before - self.queue.len();
        reader.stats.rolled_back_blocks += removed;
        debug!(
            target_instant = target.unwrap_or_default(),
            removed, "Rolled back queued log blocks"
        );
    }

    fn flush(&mut self, reader: &mut MergedLogRecordReader) -> Result<()> {
        while let Some(block) = self.queue.pop_front() {
            let provider = reader.provider.as_mut().ok_or_else(closed_error)?;
            match block.block_type() {
                LogBlockType::AvroData | LogBlockType::ParquetData => {
                    let mut rows = data_block_rows(&block, self.factory, &self.request)?;
                    while let Some(row) = rows.next_row()? {
                        provider.combine_and_update(row)?;
                        reader.stats.upserts += 1;
                    }
                    rows.close()?;
                }
                LogBlockType::Delete => {
                    for key in decode_delete_block(&block)? {
                        let record = reader
                            .keys
                            .delete_record(&key)
                            .map_err(|e| block.locate(e))?;
                        provider.update_on_delete(record)?;
                        reader.stats.deletes += 1;
                    }
                }
                LogBlockType::Corrupted | LogBlockType::Command => {}
            }
        }
        Ok(())
    }
}

fn closed_error() -> Error {
    Error::new(ErrorKind::Unexpected, "Merged log reader already closed")
}

/// Net effect of a set of delta logs, keyed by record key.
///
/// As a [`RowReader`] it yields every live merged row not matched by
/// [`MergedLogRecordReader::contains`], which is how log-only file groups are
/// read.
pub struct MergedLogRecordReader {
    provider: Option<Box<dyn MergeProvider>>,
    keys: MergeKeys,
    stats: LogScanStats,
}

impl MergedLogRecordReader {
    /// Starts building a reader over logs of a table with `schema`.
    pub fn builder(
        io: ScopedFileIO,
        schema: SchemaRef,
        keys: MergeKeys,
    ) -> MergedLogRecordReaderBuilder {
        let projection = Projection::all(&schema);
        MergedLogRecordReaderBuilder {
            io,
            schema,
            keys,
            projection,
            instant_filter: InstantFilter::default(),
            factory: Arc::new(DefaultFormatReaderFactory),
            properties: ReaderProperties::default(),
        }
    }

    fn provider_mut(&mut self) -> Result<&mut Box<dyn MergeProvider>> {
        self.provider.as_mut().ok_or_else(closed_error)
    }

    /// Replay counters.
    pub fn stats(&self) -> LogScanStats {
        self.stats
    }

    /// Variant of the merge provider in use.
    pub fn provider_kind(&self) -> Option<MergeProviderKind> {
        self.provider.as_ref().map(|p| p.kind())
    }

    /// Key and precombine extraction of this reader.
    pub fn keys(&self) -> &MergeKeys {
        &self.keys
    }

    /// Looks up the merged state of the key of `base_row`. See
    /// [`MergeProvider::contains`] for why each key matches at most once.
    pub fn contains(&mut self, base_row: &Record) -> Result<Option<MergedRecord>> {
        self.provider_mut()?.contains(base_row)
    }
}

impl RowReader for MergedLogRecordReader {
    fn next_row(&mut self) -> Result<Option<Record>> {
        match self.provider.as_mut() {
            Some(provider) => provider.next_row(),
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.provider.take() {
            Some(mut provider) => provider.close(),
            None => Ok(()),
        }
    }
}

impl Drop for MergedLogRecordReader {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "Failed to close merged log reader");
        }
    }
}
