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

//! Row readers: the capability every pipeline stage implements, plus the
//! physical decoders that sit at the bottom of each pipeline.

mod avro_rows;
mod base_file;
mod parquet_rows;

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;

pub use avro_rows::*;
pub use base_file::*;
use bytes::Bytes;
pub use parquet_rows::*;

use crate::io::ScopedFileIO;
use crate::spec::{DataFileFormat, PrimitiveType, Projection, Record, SchemaRef};
use crate::{Error, ErrorKind, Result};

/// Pull-based row iterator.
///
/// `close` must be idempotent. Stages that own inner readers close them when
/// they are closed or dropped, so a pipeline unwinds outermost stage first.
pub trait RowReader {
    /// Returns the next row, or `None` once exhausted.
    fn next_row(&mut self) -> Result<Option<Record>>;

    /// Releases every resource held by this reader.
    fn close(&mut self) -> Result<()>;
}

/// Boxed [`RowReader`].
pub type BoxedRowReader = Box<dyn RowReader>;

impl<R: RowReader + ?Sized> RowReader for Box<R> {
    fn next_row(&mut self) -> Result<Option<Record>> {
        (**self).next_row()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// What a physical decoder should produce.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    /// Table schema. Decoded rows have its arity.
    pub schema: SchemaRef,
    /// Columns to materialize. The rest stay null.
    pub projection: Projection,
    /// Start of the byte range to read.
    pub start: u64,
    /// Length of the byte range. Zero means the whole file.
    pub length: u64,
}

impl ReadRequest {
    /// Request for every projected column of the whole file.
    pub fn whole_file(schema: SchemaRef, projection: Projection) -> Self {
        Self {
            schema,
            projection,
            start: 0,
            length: 0,
        }
    }

    /// Restricts the request to a byte range.
    pub fn with_range(mut self, start: u64, length: u64) -> Self {
        self.start = start;
        self.length = length;
        self
    }

    /// Projected columns by name, with their table index and type.
    pub(crate) fn projected_columns(&self) -> HashMap<String, (usize, PrimitiveType)> {
        self.projection
            .used_indices()
            .into_iter()
            .filter_map(|idx| {
                self.schema
                    .field(idx)
                    .map(|field| (field.name.clone(), (idx, field.field_type)))
            })
            .collect()
    }
}

/// Opens physical decoders for data and delete files.
pub trait FormatReaderFactory: Debug + Send + Sync {
    /// Opens a row reader over a file through a scoped io.
    fn open_file(
        &self,
        io: &ScopedFileIO,
        path: &str,
        format: DataFileFormat,
        request: &ReadRequest,
    ) -> Result<BoxedRowReader>;

    /// Opens a row reader over bytes already in memory, for example a file
    /// embedded in a log block.
    fn open_bytes(
        &self,
        bytes: Bytes,
        format: DataFileFormat,
        request: &ReadRequest,
    ) -> Result<BoxedRowReader>;
}

/// Factory for the bundled Parquet and Avro decoders.
#[derive(Debug, Default, Clone)]
pub struct DefaultFormatReaderFactory;

impl FormatReaderFactory for DefaultFormatReaderFactory {
    fn open_file(
        &self,
        io: &ScopedFileIO,
        path: &str,
        format: DataFileFormat,
        request: &ReadRequest,
    ) -> Result<BoxedRowReader> {
        match format {
            DataFileFormat::Parquet => {
                let size = io.metadata(path)?.size;
                let file = io.open(path)?;
                Ok(Box::new(ParquetRowReader::try_new(file, size, request)?))
            }
            DataFileFormat::Avro => {
                if request.start > 0 {
                    return Err(Error::new(
                        ErrorKind::FeatureUnsupported,
                        format!("Avro data file {path} can't be split at offset {}", request.start),
                    ));
                }
                Ok(Box::new(AvroRowReader::try_new(io.read_all(path)?, request)?))
            }
            DataFileFormat::Orc => Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("No decoder for {format} file {path}"),
            )),
        }
    }

    fn open_bytes(
        &self,
        bytes: Bytes,
        format: DataFileFormat,
        request: &ReadRequest,
    ) -> Result<BoxedRowReader> {
        match format {
            DataFileFormat::Parquet => Ok(Box::new(ParquetRowReader::try_from_bytes(
                bytes, request,
            )?)),
            DataFileFormat::Avro => Ok(Box::new(AvroRowReader::try_new(bytes, request)?)),
            DataFileFormat::Orc => Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("No decoder for in-memory {format} data"),
            )),
        }
    }
}

/// Row reader over rows already materialized in memory.
#[derive(Debug, Default)]
pub struct VecRowReader {
    rows: VecDeque<Record>,
}

impl VecRowReader {
    /// Creates a reader yielding `rows` in order.
    pub fn new(rows: impl IntoIterator<Item = Record>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }
}

impl RowReader for VecRowReader {
    fn next_row(&mut self) -> Result<Option<Record>> {
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }
}

/// Drains a reader into a vector and closes it.
pub fn collect_rows(reader: &mut dyn RowReader) -> Result<Vec<Record>> {
    let mut rows = Vec::new();
    while let Some(row) = reader.next_row()? {
        rows.push(row);
    }
    reader.close()?;
    Ok(rows)
}
