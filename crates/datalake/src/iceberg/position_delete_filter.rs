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

//! Drops rows addressed by `(file_path, pos)` position delete files.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::delete_vector::DeleteVector;
use crate::io::ScopedFileIO;
use crate::reader::{BoxedRowReader, FormatReaderFactory, ReadRequest, RowReader};
use crate::spec::{
    Datum, Field, FileFragment, PrimitiveType, Projection, Record, Schema, SchemaRef,
};
use crate::{Error, ErrorKind, Result};

/// Column holding the data file path in position delete files.
pub const POSITION_DELETE_FILE_PATH: &str = "file_path";
/// Column holding the deleted row ordinal in position delete files.
pub const POSITION_DELETE_POS: &str = "pos";

/// Schema of position delete files.
pub fn position_delete_schema() -> Result<SchemaRef> {
    Schema::builder()
        .with_fields([
            Field::required(POSITION_DELETE_FILE_PATH, PrimitiveType::String),
            Field::required(POSITION_DELETE_POS, PrimitiveType::Long),
        ])
        .build()
        .map(Arc::new)
}

/// How deleted positions are looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionDeleteStrategy {
    /// Every matching position loaded into a bitmap up front.
    InMemory,
    /// Sorted delete files merged lazily alongside the base rows.
    Streaming,
}

impl PositionDeleteStrategy {
    /// Picks the strategy for `total_records` delete rows.
    pub fn select(total_records: u64, threshold: u64) -> Self {
        if total_records < threshold {
            PositionDeleteStrategy::InMemory
        } else {
            PositionDeleteStrategy::Streaming
        }
    }
}

impl fmt::Display for PositionDeleteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionDeleteStrategy::InMemory => write!(f, "in-memory"),
            PositionDeleteStrategy::Streaming => write!(f, "streaming"),
        }
    }
}

/// Positions of one delete file that target a single data file.
struct PositionStream {
    reader: BoxedRowReader,
    delete_file: String,
    data_file: Arc<str>,
    last: Option<u64>,
}

impl PositionStream {
    fn open(
        factory: &dyn FormatReaderFactory,
        io: &ScopedFileIO,
        fragment: &FileFragment,
        data_file: Arc<str>,
    ) -> Result<Self> {
        let schema = position_delete_schema()?;
        let request = ReadRequest::whole_file(schema.clone(), Projection::all(&schema));
        let reader = factory.open_file(io, &fragment.file_path, fragment.format, &request)?;
        Ok(Self {
            reader,
            delete_file: fragment.file_path.clone(),
            data_file,
            last: None,
        })
    }

    /// Next position for the data file, in ascending order.
    fn next_position(&mut self) -> Result<Option<u64>> {
        while let Some(row) = self.reader.next_row()? {
            let (Some(Datum::String(path)), Some(Datum::Long(pos))) = (row.get(0), row.get(1))
            else {
                return Err(Error::new(ErrorKind::DataInvalid, "null values in delete file")
                    .with_context("file", self.delete_file.clone()));
            };
            if path.as_str() != &*self.data_file {
                continue;
            }
            let pos = u64::try_from(*pos).map_err(|_| {
                Error::new(ErrorKind::DataInvalid, format!("Negative delete position {pos}"))
                    .with_context("file", self.delete_file.clone())
            })?;
            if self.last.is_some_and(|last| pos < last) {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    "Position delete file is not sorted by position",
                )
                .with_context("file", self.delete_file.clone())
                .with_context("pos", pos.to_string()));
            }
            self.last = Some(pos);
            return Ok(Some(pos));
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        self.reader.close()
    }
}

/// K-way merge of sorted position streams into one ascending cursor.
struct PositionMerger {
    streams: Vec<PositionStream>,
    heap: BinaryHeap<Reverse<(u64, usize)>>,
}

impl PositionMerger {
    fn try_new(mut streams: Vec<PositionStream>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(streams.len());
        for (idx, stream) in streams.iter_mut().enumerate() {
            if let Some(pos) = stream.next_position()? {
                heap.push(Reverse((pos, idx)));
            }
        }
        Ok(Self { streams, heap })
    }

    /// Consumes every delete position up to `pos` and reports whether one of
    /// them is `pos`.
    fn skip_to(&mut self, pos: u64) -> Result<bool> {
        let mut hit = false;
        while let Some(Reverse((next, idx))) = self.heap.peek().copied() {
            if next > pos {
                break;
            }
            self.heap.pop();
            hit |= next == pos;
            if let Some(following) = self.streams[idx].next_position()? {
                self.heap.push(Reverse((following, idx)));
            }
        }
        Ok(hit)
    }

    fn close(&mut self) -> Result<()> {
        self.heap.clear();
        let mut result = Ok(());
        for stream in self.streams.iter_mut().rev() {
            result = result.and(stream.close());
        }
        result
    }
}

fn load_positions(streams: &mut [PositionStream]) -> Result<DeleteVector> {
    let mut positions = DeleteVector::new();
    for stream in streams {
        while let Some(pos) = stream.next_position()? {
            positions.insert(pos);
        }
    }
    Ok(positions)
}

fn close_all(streams: &mut [PositionStream]) {
    for stream in streams.iter_mut().rev() {
        if let Err(err) = stream.close() {
            tracing::warn!(%err, file = %stream.delete_file, "Failed to close position delete file");
        }
    }
}

enum DeleteSource {
    InMemory(DeleteVector),
    Streaming(PositionMerger),
}

impl DeleteSource {
    fn is_deleted(&mut self, pos: u64) -> Result<bool> {
        match self {
            DeleteSource::InMemory(positions) => Ok(positions.contains(pos)),
            DeleteSource::Streaming(merger) => merger.skip_to(pos),
        }
    }
}

/// Filters a base file reader by the position delete files of its task.
pub struct PositionDeleteFilter {
    inner: Option<BoxedRowReader>,
    source: Option<DeleteSource>,
    strategy: PositionDeleteStrategy,
    deleted: u64,
}

impl PositionDeleteFilter {
    /// Builds the filter over `inner`, which must emit row positions of
    /// `data_file_path`. The strategy is fixed here from the declared record
    /// counts of `deletes`.
    pub fn try_new(
        inner: BoxedRowReader,
        factory: &dyn FormatReaderFactory,
        io: &ScopedFileIO,
        data_file_path: &str,
        deletes: &[FileFragment],
        streaming_threshold: u64,
    ) -> Result<Self> {
        let total_records = deletes.iter().map(|f| f.record_count).sum();
        let strategy = PositionDeleteStrategy::select(total_records, streaming_threshold);
        debug!(
            file = data_file_path,
            delete_files = deletes.len(),
            total_records,
            %strategy,
            "Building position delete filter"
        );

        let data_file: Arc<str> = Arc::from(data_file_path);
        let mut streams = Vec::with_capacity(deletes.len());
        for fragment in deletes {
            match PositionStream::open(factory, io, fragment, data_file.clone()) {
                Ok(stream) => streams.push(stream),
                Err(err) => {
                    close_all(&mut streams);
                    return Err(err);
                }
            }
        }

        let source = match strategy {
            PositionDeleteStrategy::InMemory => {
                let positions = load_positions(&mut streams);
                close_all(&mut streams);
                DeleteSource::InMemory(positions?)
            }
            PositionDeleteStrategy::Streaming => {
                DeleteSource::Streaming(PositionMerger::try_new(streams)?)
            }
        };

        Ok(Self {
            inner: Some(inner),
            source: Some(source),
            strategy,
            deleted: 0,
        })
    }

    /// Strategy picked at construction.
    pub fn strategy(&self) -> PositionDeleteStrategy {
        self.strategy
    }
}

impl RowReader for PositionDeleteFilter {
    fn next_row(&mut self) -> Result<Option<Record>> {
        let (Some(inner), Some(source)) = (self.inner.as_mut(), self.source.as_mut()) else {
            return Ok(None);
        };
        while let Some(row) = inner.next_row()? {
            let pos = row.position().ok_or_else(|| {
                Error::new(
                    ErrorKind::DataInvalid,
                    "Position deletes need rows with physical positions",
                )
            })?;
            if source.is_deleted(pos)? {
                self.deleted += 1;
                continue;
            }
            return Ok(Some(row));
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        let source = match self.source.take() {
            Some(DeleteSource::Streaming(mut merger)) => merger.close(),
            _ => Ok(()),
        };
        let inner = match self.inner.take() {
            Some(mut inner) => {
                debug!(
                    deleted = self.deleted,
                    strategy = %self.strategy,
                    "Position delete filter closed"
                );
                inner.close()
            }
            None => Ok(()),
        };
        source.and(inner)
    }
}

impl Drop for PositionDeleteFilter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "Failed to close position delete filter");
        }
    }
}
