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

//! Framing of blocks in a Hudi delta log file.
//!
//! ```text
//! magic "#HUDI#" | int64 block size | int32 version | int32 block type
//!   | header (v1+) | int64 content length (v1+) | content | footer (v1+)
//!   | int64 backpointer (v1+)
//! ```
//!
//! All integers are big-endian. The block size counts every byte after the
//! size field up to and including the backpointer. The backpointer holds the
//! block size plus the magic length.

use std::collections::BTreeMap;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, ErrorKind, Result};

/// Marker starting every block.
pub const MAGIC: &[u8; 6] = b"#HUDI#";

/// Version without header, content length, footer or backpointer.
pub const LOG_FORMAT_VERSION_0: i32 = 0;
/// Current log format version.
pub const LOG_FORMAT_VERSION_CURRENT: i32 = 1;

/// Kind of a log block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogBlockType {
    /// Control block, for example a rollback.
    Command,
    /// Serialized delete keys.
    Delete,
    /// Bytes that failed the integrity check. Never decoded.
    Corrupted,
    /// Avro encoded records.
    AvroData,
    /// Embedded parquet file.
    ParquetData,
}

impl LogBlockType {
    /// Maps an on-disk block type id.
    ///
    /// HFile and change-data-capture blocks are not supported, and a block can
    /// only be marked corrupted by the reader, never on disk.
    pub fn from_id(id: i32) -> Result<Self> {
        match id {
            0 => Ok(Self::Command),
            1 => Ok(Self::Delete),
            3 => Ok(Self::AvroData),
            5 => Ok(Self::ParquetData),
            2 | 4 | 6 => Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("Unsupported log block type id {id}"),
            )),
            _ => Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("Unknown log block type id {id}"),
            )),
        }
    }

    /// On-disk id.
    pub fn id(&self) -> i32 {
        match self {
            Self::Command => 0,
            Self::Delete => 1,
            Self::Corrupted => 2,
            Self::AvroData => 3,
            Self::ParquetData => 5,
        }
    }

    /// Whether the block carries upserted records.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::AvroData | Self::ParquetData)
    }
}

impl fmt::Display for LogBlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "COMMAND"),
            Self::Delete => write!(f, "DELETE"),
            Self::Corrupted => write!(f, "CORRUPTED"),
            Self::AvroData => write!(f, "AVRO_DATA"),
            Self::ParquetData => write!(f, "PARQUET_DATA"),
        }
    }
}

/// Keys of header and footer metadata entries, indexed by ordinal on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HeaderMetadataType {
    /// Instant of the commit that wrote the block.
    InstantTime,
    /// Instant a command block applies to.
    TargetInstantTime,
    /// Avro schema of the records of a data block.
    Schema,
    /// Command kind of a command block.
    CommandBlockType,
    /// Instants merged into a compacted block.
    CompactedBlockTimes,
    /// Base file positions of the records.
    RecordPositions,
    /// Identifier used to detect duplicated blocks on retries.
    BlockIdentifier,
    /// Whether the block holds partial updates.
    IsPartial,
    /// Base file instant that [`HeaderMetadataType::RecordPositions`] refer to.
    BaseFileInstantTimeOfRecordPositions,
}

impl HeaderMetadataType {
    const ALL: [HeaderMetadataType; 9] = [
        Self::InstantTime,
        Self::TargetInstantTime,
        Self::Schema,
        Self::CommandBlockType,
        Self::CompactedBlockTimes,
        Self::RecordPositions,
        Self::BlockIdentifier,
        Self::IsPartial,
        Self::BaseFileInstantTimeOfRecordPositions,
    ];

    /// Maps an on-disk ordinal. Unknown ordinals yield `None`.
    pub fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    /// On-disk ordinal.
    pub fn index(&self) -> i32 {
        *self as i32
    }
}

/// Command type stored under [`HeaderMetadataType::CommandBlockType`] for a rollback.
pub const ROLLBACK_COMMAND: &str = "0";

/// Metadata entries of a header or footer.
pub type BlockMetadata = BTreeMap<HeaderMetadataType, String>;

/// Where a block was read from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockLocation {
    /// Log file path.
    pub file_path: String,
    /// Offset of the block's magic.
    pub offset: u64,
    /// Total bytes of the block, magic included.
    pub length: u64,
}

/// One block of a delta log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBlock {
    block_type: LogBlockType,
    version: i32,
    header: BlockMetadata,
    footer: BlockMetadata,
    content: Bytes,
    location: BlockLocation,
}

impl LogBlock {
    /// Creates a block of the current format version.
    pub fn new(block_type: LogBlockType, header: BlockMetadata, content: Bytes) -> Self {
        Self {
            block_type,
            version: LOG_FORMAT_VERSION_CURRENT,
            header,
            footer: BlockMetadata::new(),
            content,
            location: BlockLocation::default(),
        }
    }

    /// Opaque block covering bytes that failed the integrity check.
    pub fn corrupted(content: Bytes, location: BlockLocation) -> Self {
        Self {
            block_type: LogBlockType::Corrupted,
            version: LOG_FORMAT_VERSION_CURRENT,
            header: BlockMetadata::new(),
            footer: BlockMetadata::new(),
            content,
            location,
        }
    }

    /// Rollback command targeting `target_instant`.
    pub fn rollback(instant: impl Into<String>, target_instant: impl Into<String>) -> Self {
        let header = BlockMetadata::from([
            (HeaderMetadataType::InstantTime, instant.into()),
            (HeaderMetadataType::TargetInstantTime, target_instant.into()),
            (
                HeaderMetadataType::CommandBlockType,
                ROLLBACK_COMMAND.to_string(),
            ),
        ]);
        Self::new(LogBlockType::Command, header, Bytes::new())
    }

    /// Sets the format version.
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Sets the footer.
    pub fn with_footer(mut self, footer: BlockMetadata) -> Self {
        self.footer = footer;
        self
    }

    pub(crate) fn with_location(mut self, location: BlockLocation) -> Self {
        self.location = location;
        self
    }

    /// Kind of the block.
    pub fn block_type(&self) -> LogBlockType {
        self.block_type
    }

    /// Log format version the block was written with.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Header metadata.
    pub fn header(&self) -> &BlockMetadata {
        &self.header
    }

    /// Footer metadata.
    pub fn footer(&self) -> &BlockMetadata {
        &self.footer
    }

    /// Content bytes. For corrupted blocks, the whole corrupted span.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Where the block was read from. Default for blocks built in memory.
    pub fn location(&self) -> &BlockLocation {
        &self.location
    }

    /// Attaches this block's file and offset to `err` unless it already
    /// names a file.
    pub(crate) fn locate(&self, err: Error) -> Error {
        if err.context_value("file").is_some() {
            return err;
        }
        err.with_context("file", self.location.file_path.clone())
            .with_context("offset", self.location.offset.to_string())
    }

    /// Instant of the commit that wrote this block.
    pub fn instant_time(&self) -> Option<&str> {
        self.header
            .get(&HeaderMetadataType::InstantTime)
            .map(String::as_str)
    }

    /// Instant a command block applies to.
    pub fn target_instant_time(&self) -> Option<&str> {
        self.header
            .get(&HeaderMetadataType::TargetInstantTime)
            .map(String::as_str)
    }

    /// Writer schema of a data block.
    pub fn schema(&self) -> Option<&str> {
        self.header
            .get(&HeaderMetadataType::Schema)
            .map(String::as_str)
    }

    /// Whether this is a rollback command.
    pub fn is_rollback(&self) -> bool {
        self.block_type == LogBlockType::Command
            && self
                .header
                .get(&HeaderMetadataType::CommandBlockType)
                .map(String::as_str)
                == Some(ROLLBACK_COMMAND)
    }

    fn has_metadata_sections(&self) -> bool {
        self.version != LOG_FORMAT_VERSION_0
    }

    /// Serializes the block with its magic and framing.
    pub fn encode(&self) -> Result<Bytes> {
        if self.block_type == LogBlockType::Corrupted {
            return Err(Error::new(
                ErrorKind::Unexpected,
                "Corrupted blocks can't be encoded",
            ));
        }

        let mut body = BytesMut::new();
        body.put_i32(self.version);
        body.put_i32(self.block_type.id());
        if self.has_metadata_sections() {
            encode_metadata(&mut body, &self.header)?;
            body.put_i64(self.content.len() as i64);
            body.put_slice(&self.content);
            encode_metadata(&mut body, &self.footer)?;
        } else {
            body.put_slice(&self.content);
        }

        let mut block_size = body.len() as i64;
        if self.has_metadata_sections() {
            block_size += 8;
        }

        let mut out = BytesMut::with_capacity(MAGIC.len() + 8 + block_size as usize);
        out.put_slice(MAGIC);
        out.put_i64(block_size);
        out.put_slice(&body);
        if self.has_metadata_sections() {
            out.put_i64(block_size + MAGIC.len() as i64);
        }
        Ok(out.freeze())
    }
}

fn encode_metadata(buf: &mut BytesMut, metadata: &BlockMetadata) -> Result<()> {
    buf.put_i32(i32::try_from(metadata.len())?);
    for (key, value) in metadata {
        buf.put_i32(key.index());
        buf.put_i32(i32::try_from(value.len())?);
        buf.put_slice(value.as_bytes());
    }
    Ok(())
}

/// Cursor over the bytes of one block, reporting failures with the file and
/// absolute offset.
pub(crate) struct BlockCursor<'a> {
    buf: Bytes,
    file_path: &'a str,
    base_offset: u64,
    total: usize,
}

impl<'a> BlockCursor<'a> {
    pub(crate) fn new(buf: Bytes, file_path: &'a str, base_offset: u64) -> Self {
        let total = buf.len();
        Self {
            buf,
            file_path,
            base_offset,
            total,
        }
    }

    pub(crate) fn offset(&self) -> u64 {
        self.base_offset + (self.total - self.buf.remaining()) as u64
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, len: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Unexpected end of block while reading {what}: need {len} bytes, {} left",
                    self.buf.remaining()
                ),
            )
            .with_context("file", self.file_path)
            .with_context("offset", self.offset().to_string()));
        }
        Ok(())
    }

    pub(crate) fn get_i32(&mut self, what: &str) -> Result<i32> {
        self.ensure(4, what)?;
        Ok(self.buf.get_i32())
    }

    pub(crate) fn get_i64(&mut self, what: &str) -> Result<i64> {
        self.ensure(8, what)?;
        Ok(self.buf.get_i64())
    }

    pub(crate) fn get_bytes(&mut self, len: usize, what: &str) -> Result<Bytes> {
        self.ensure(len, what)?;
        Ok(self.buf.copy_to_bytes(len))
    }

    pub(crate) fn get_len(&mut self, what: &str) -> Result<usize> {
        let offset = self.offset();
        let len = self.get_i64(what)?;
        usize::try_from(len).map_err(|_| {
            Error::new(ErrorKind::DataInvalid, format!("Negative {what}: {len}"))
                .with_context("file", self.file_path)
                .with_context("offset", offset.to_string())
        })
    }

    pub(crate) fn get_metadata(&mut self) -> Result<BlockMetadata> {
        let count = self.get_i32("metadata entry count")?;
        let mut metadata = BlockMetadata::new();
        for _ in 0..count.max(0) {
            let offset = self.offset();
            let index = self.get_i32("metadata kind")?;
            let kind = HeaderMetadataType::from_index(index).ok_or_else(|| {
                Error::new(
                    ErrorKind::MalformedMetadata,
                    format!("Invalid metadata kind index {index}"),
                )
                .with_context("file", self.file_path)
                .with_context("offset", offset.to_string())
            })?;
            let len = self.get_i32("metadata value length")?;
            let len = usize::try_from(len).map_err(|_| {
                Error::new(
                    ErrorKind::MalformedMetadata,
                    format!("Negative metadata value length {len}"),
                )
                .with_context("file", self.file_path)
                .with_context("offset", offset.to_string())
            })?;
            let value = self.get_bytes(len, "metadata value")?;
            let value = String::from_utf8(value.to_vec()).map_err(|e| {
                Error::new(ErrorKind::MalformedMetadata, "Metadata value is not UTF-8")
                    .with_context("file", self.file_path)
                    .with_context("offset", offset.to_string())
                    .with_source(e)
            })?;
            metadata.insert(kind, value);
        }
        Ok(metadata)
    }
}

/// Appends encoded blocks (or raw bytes) into a log file image.
#[derive(Debug, Default)]
pub struct LogBlockWriter {
    buf: BytesMut,
}

impl LogBlockWriter {
    /// Creates an empty file image.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one block and returns its offset in the file.
    pub fn append(&mut self, block: &LogBlock) -> Result<u64> {
        let offset = self.buf.len() as u64;
        self.buf.put_slice(&block.encode()?);
        Ok(offset)
    }

    /// Appends raw bytes, for example a torn write.
    pub fn append_raw(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.buf.len() as u64;
        self.buf.put_slice(bytes);
        offset
    }

    /// Current length of the file image.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing was appended yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the file image.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
