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

//! Sequential reader of the blocks in one delta log file.

use std::sync::Arc;

use bytes::{Buf, Bytes};
use tracing::info;

use super::log_format::{
    BlockCursor, BlockLocation, LOG_FORMAT_VERSION_0, LogBlock, LogBlockType, MAGIC,
};
use crate::io::{FileRead, ScopedFileIO};
use crate::{Error, ErrorKind, Result};

const SIZE_FIELD_LEN: u64 = 8;
// version + block type
const MIN_BLOCK_SIZE: i64 = 8;

/// Lazily yields the blocks of one log file.
///
/// A block failing the integrity check (size field not matching the
/// backpointer, no magic after it, or running past the end of file) is
/// returned as one [`LogBlockType::Corrupted`] block spanning from its magic
/// to the next magic or end of file, and reading resumes there.
pub struct LogBlockReader {
    file_path: String,
    file: Option<Arc<dyn FileRead>>,
    file_len: u64,
    pos: u64,
    scan_buffer_bytes: usize,
}

impl LogBlockReader {
    /// Opens `file_path` through a scoped io.
    ///
    /// `scan_buffer_bytes` is the window size used when searching for the
    /// next magic after a corrupted block, and must exceed the magic length.
    pub fn open(io: &ScopedFileIO, file_path: &str, scan_buffer_bytes: usize) -> Result<Self> {
        if scan_buffer_bytes <= MAGIC.len() {
            return Err(Error::new(
                ErrorKind::ConfigInvalid,
                format!("Log scan buffer of {scan_buffer_bytes} bytes is smaller than the magic"),
            ));
        }
        let file_len = io.metadata(file_path)?.size;
        let file = io.open(file_path)?;
        Ok(Self {
            file_path: file_path.to_string(),
            file: Some(file),
            file_len,
            pos: 0,
            scan_buffer_bytes,
        })
    }

    /// Path of the log file.
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    fn read(&self, start: u64, end: u64) -> Result<Bytes> {
        let file = self.file.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Unexpected, "Log block reader already closed")
                .with_context("file", self.file_path.clone())
        })?;
        file.read(start..end)
    }

    fn has_magic_at(&self, pos: u64) -> Result<bool> {
        if self.file_len - pos < MAGIC.len() as u64 {
            return Ok(false);
        }
        Ok(&self.read(pos, pos + MAGIC.len() as u64)?[..] == MAGIC)
    }

    /// Finds the next magic at or after `from`, scanning windows that overlap
    /// by the magic length.
    fn find_next_magic(&self, from: u64) -> Result<Option<u64>> {
        let overlap = MAGIC.len() as u64;
        let mut window_start = from;
        while window_start < self.file_len {
            let window_end = (window_start + self.scan_buffer_bytes as u64).min(self.file_len);
            let window = self.read(window_start, window_end)?;
            if let Some(idx) = window.windows(MAGIC.len()).position(|w| w == MAGIC) {
                return Ok(Some(window_start + idx as u64));
            }
            if window_end == self.file_len {
                break;
            }
            window_start = window_end - overlap;
        }
        Ok(None)
    }

    fn corrupted_block(&mut self, start: u64, search_from: u64) -> Result<LogBlock> {
        let end = self.find_next_magic(search_from)?.unwrap_or(self.file_len);
        let content = self.read(start, end)?;
        info!(
            file = %self.file_path,
            offset = start,
            length = end - start,
            "Found corrupted log block"
        );
        self.pos = end;
        Ok(LogBlock::corrupted(content, BlockLocation {
            file_path: self.file_path.clone(),
            offset: start,
            length: end - start,
        }))
    }

    /// Returns the next block, or `None` at end of file.
    pub fn next_block(&mut self) -> Result<Option<LogBlock>> {
        if self.file.is_none() || self.pos >= self.file_len {
            return Ok(None);
        }
        let start = self.pos;
        let magic_len = MAGIC.len() as u64;

        if !self.has_magic_at(start)? {
            return self.corrupted_block(start, start + 1).map(Some);
        }
        if self.file_len - start < magic_len + SIZE_FIELD_LEN {
            return self.corrupted_block(start, start + magic_len).map(Some);
        }

        let mut size_bytes = self.read(start + magic_len, start + magic_len + SIZE_FIELD_LEN)?;
        let block_size = size_bytes.get_i64();
        let body_start = start + magic_len + SIZE_FIELD_LEN;
        let body_end = match u64::try_from(block_size)
            .ok()
            .filter(|_| block_size >= MIN_BLOCK_SIZE)
            .and_then(|size| body_start.checked_add(size))
        {
            Some(end) if end <= self.file_len => end,
            _ => return self.corrupted_block(start, start + magic_len).map(Some),
        };

        let body = self.read(body_start, body_end)?;
        if !Self::backpointer_matches(&body, block_size)
            || (body_end < self.file_len && !self.has_magic_at(body_end)?)
        {
            return self.corrupted_block(start, start + magic_len).map(Some);
        }

        let block = self.parse_block(body, body_start)?.with_location(BlockLocation {
            file_path: self.file_path.clone(),
            offset: start,
            length: body_end - start,
        });
        self.pos = body_end;
        Ok(Some(block))
    }

    fn backpointer_matches(body: &Bytes, block_size: i64) -> bool {
        let version = (&body[..4]).get_i32();
        if version == LOG_FORMAT_VERSION_0 {
            return true;
        }
        if body.len() < 16 {
            return false;
        }
        let backpointer = (&body[body.len() - 8..]).get_i64();
        backpointer - MAGIC.len() as i64 == block_size
    }

    fn parse_block(&self, body: Bytes, body_start: u64) -> Result<LogBlock> {
        let mut cursor = BlockCursor::new(body, &self.file_path, body_start);
        let version = cursor.get_i32("format version")?;
        let type_offset = cursor.offset();
        let type_id = cursor.get_i32("block type")?;
        let block_type = LogBlockType::from_id(type_id).map_err(|e| {
            e.with_context("file", self.file_path.clone())
                .with_context("offset", type_offset.to_string())
        })?;

        if version == LOG_FORMAT_VERSION_0 {
            let content = cursor.get_bytes(cursor.remaining(), "content")?;
            return Ok(LogBlock::new(block_type, Default::default(), content).with_version(version));
        }

        let header = cursor.get_metadata()?;
        let content_len = cursor.get_len("content length")?;
        let content = cursor.get_bytes(content_len, "content")?;
        let footer = cursor.get_metadata()?;
        if cursor.remaining() != SIZE_FIELD_LEN as usize {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Block layout doesn't match its size: {} bytes left before backpointer",
                    cursor.remaining() as i64 - SIZE_FIELD_LEN as i64
                ),
            )
            .with_context("file", self.file_path.clone())
            .with_context("offset", cursor.offset().to_string()));
        }

        Ok(LogBlock::new(block_type, header, content)
            .with_version(version)
            .with_footer(footer))
    }

    /// Releases the file handle. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }
}

impl Drop for LogBlockReader {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(file = %self.file_path, %err, "Failed to close log file");
        }
    }
}
