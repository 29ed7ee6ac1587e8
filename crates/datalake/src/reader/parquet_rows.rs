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

//! Parquet decoder built on the `parquet` record API.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use parquet::errors::ParquetError;
use parquet::file::metadata::RowGroupMetaData;
use parquet::file::reader::{ChunkReader, FileReader, Length, SerializedFileReader};
use parquet::file::serialized_reader::ReadOptionsBuilder;
use parquet::record::reader::RowIter;
use parquet::record::{Field as ParquetField, Row};
use parquet::schema::types::Type;

use super::{ReadRequest, RowReader};
use crate::io::FileRead;
use crate::spec::{Datum, PrimitiveType, Record};
use crate::{Error, ErrorKind, Result};

/// Adapts a [`FileRead`] to the synchronous [`ChunkReader`] used by the
/// parquet file reader.
#[derive(Clone)]
struct FileReadChunkReader {
    file: Arc<dyn FileRead>,
    size: u64,
}

impl Length for FileReadChunkReader {
    fn len(&self) -> u64 {
        self.size
    }
}

impl ChunkReader for FileReadChunkReader {
    type T = bytes::buf::Reader<Bytes>;

    fn get_read(&self, start: u64) -> parquet::errors::Result<Self::T> {
        let length = self.size.saturating_sub(start) as usize;
        Ok(self.get_bytes(start, length)?.reader())
    }

    fn get_bytes(&self, start: u64, length: usize) -> parquet::errors::Result<Bytes> {
        self.file
            .read(start..start + length as u64)
            .map_err(|err| ParquetError::External(Box::new(err)))
    }
}

/// Converts a parquet error back into the crate error, unwrapping errors that
/// originated in our own transport.
pub(crate) fn map_parquet_error(err: ParquetError) -> Error {
    match err {
        ParquetError::External(inner) => match inner.downcast::<Error>() {
            Ok(err) => *err,
            Err(inner) => Error::new(ErrorKind::DataInvalid, "Failed to read parquet file")
                .with_source(anyhow::anyhow!(inner)),
        },
        err => Error::new(ErrorKind::DataInvalid, "Failed to read parquet file").with_source(err),
    }
}

fn row_group_midpoint(row_group: &RowGroupMetaData) -> i64 {
    let start = if row_group.num_columns() == 0 {
        0
    } else {
        let column = row_group.column(0);
        match column.dictionary_page_offset() {
            Some(dict) if dict > 0 && dict < column.data_page_offset() => dict,
            _ => column.data_page_offset(),
        }
    };
    start + row_group.compressed_size() / 2
}

/// A row group belongs to the byte range containing its midpoint.
fn row_group_in_range(row_group: &RowGroupMetaData, request: &ReadRequest) -> bool {
    let mid = row_group_midpoint(row_group).max(0) as u64;
    mid >= request.start && (request.length == 0 || mid < request.start + request.length)
}

fn field_to_datum(field: &ParquetField) -> Result<Option<Datum>> {
    let datum = match field {
        ParquetField::Null => return Ok(None),
        ParquetField::Bool(v) => Datum::Boolean(*v),
        ParquetField::Byte(v) => Datum::Int(*v as i32),
        ParquetField::Short(v) => Datum::Int(*v as i32),
        ParquetField::Int(v) => Datum::Int(*v),
        ParquetField::Long(v) => Datum::Long(*v),
        ParquetField::UByte(v) => Datum::Int(*v as i32),
        ParquetField::UShort(v) => Datum::Int(*v as i32),
        ParquetField::UInt(v) => Datum::Long(*v as i64),
        ParquetField::Float(v) => Datum::float(*v),
        ParquetField::Double(v) => Datum::double(*v),
        ParquetField::Str(v) => Datum::String(v.clone()),
        ParquetField::Bytes(v) => Datum::Binary(v.data().to_vec()),
        ParquetField::Date(v) => Datum::Date(*v),
        ParquetField::TimestampMillis(v) => Datum::Timestamp(v.saturating_mul(1000)),
        ParquetField::TimestampMicros(v) => Datum::Timestamp(*v),
        other => {
            return Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("Unsupported parquet value {other}"),
            ));
        }
    };
    Ok(Some(datum))
}

/// Streams rows of the row groups selected by a [`ReadRequest`].
///
/// Columns are matched by name. Table columns missing from the file read as
/// null. Each row carries its ordinal in the whole file as position.
pub struct ParquetRowReader {
    rows: Option<RowIter<'static>>,
    file: Option<Arc<dyn FileRead>>,
    columns: HashMap<String, (usize, PrimitiveType)>,
    arity: usize,
    // (next position, rows left) per selected row group.
    segments: VecDeque<(u64, u64)>,
}

impl ParquetRowReader {
    /// Opens a reader over a file handle of `size` bytes. The handle is
    /// closed with the reader.
    pub fn try_new(file: Arc<dyn FileRead>, size: u64, request: &ReadRequest) -> Result<Self> {
        let chunk = FileReadChunkReader {
            file: file.clone(),
            size,
        };
        match Self::build(chunk, request) {
            Ok(mut reader) => {
                reader.file = Some(file);
                Ok(reader)
            }
            Err(err) => {
                file.close()?;
                Err(err)
            }
        }
    }

    /// Opens a reader over an in-memory parquet file.
    pub fn try_from_bytes(bytes: Bytes, request: &ReadRequest) -> Result<Self> {
        Self::build(bytes, request)
    }

    fn build<R: ChunkReader + Clone + 'static>(chunk: R, request: &ReadRequest) -> Result<Self> {
        let footer = SerializedFileReader::new(chunk.clone()).map_err(map_parquet_error)?;

        let mut selected = Vec::new();
        let mut segments = VecDeque::new();
        let mut first_row = 0u64;
        for (idx, row_group) in footer.metadata().row_groups().iter().enumerate() {
            let num_rows = row_group.num_rows().max(0) as u64;
            if row_group_in_range(row_group, request) {
                selected.push(idx);
                segments.push_back((first_row, num_rows));
            }
            first_row += num_rows;
        }

        let columns = request.projected_columns();

        let file_schema = footer.metadata().file_metadata().schema();
        // A projection must carry the same root name as the file schema.
        let root_name = file_schema.name().to_string();
        let file_fields = file_schema
            .get_fields()
            .iter()
            .filter(|f| columns.contains_key(f.name()))
            .cloned()
            .collect::<Vec<_>>();
        drop(footer);

        let options = ReadOptionsBuilder::new()
            .with_predicate(Box::new(move |_: &RowGroupMetaData, idx: usize| {
                selected.contains(&idx)
            }))
            .build();
        let reader =
            SerializedFileReader::new_with_options(chunk, options).map_err(map_parquet_error)?;
        let mut rows = RowIter::from_file_into(Box::new(reader));
        if !file_fields.is_empty() {
            let projection = Type::group_type_builder(&root_name)
                .with_fields(file_fields)
                .build()
                .map_err(map_parquet_error)?;
            rows = rows.project(Some(projection)).map_err(map_parquet_error)?;
        }

        Ok(Self {
            rows: Some(rows),
            file: None,
            columns,
            arity: request.schema.len(),
            segments,
        })
    }

    fn next_position(&mut self) -> Option<u64> {
        while let Some((next, left)) = self.segments.front_mut() {
            if *left > 0 {
                let pos = *next;
                *next += 1;
                *left -= 1;
                return Some(pos);
            }
            self.segments.pop_front();
        }
        None
    }

    fn convert(&self, row: &Row) -> Result<Record> {
        let mut record = Record::new_null(self.arity);
        for (name, field) in row.get_column_iter() {
            if let Some((idx, ty)) = self.columns.get(name) {
                let value = field_to_datum(field)?
                    .map(|datum| datum.coerce(*ty))
                    .transpose()?;
                record.set(*idx, value);
            }
        }
        Ok(record)
    }
}

impl RowReader for ParquetRowReader {
    fn next_row(&mut self) -> Result<Option<Record>> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };
        let row = match rows.next() {
            Some(row) => row.map_err(map_parquet_error)?,
            None => return Ok(None),
        };
        let record = self.convert(&row)?;
        Ok(Some(match self.next_position() {
            Some(pos) => record.with_position(pos),
            None => record,
        }))
    }

    fn close(&mut self) -> Result<()> {
        self.rows = None;
        if let Some(file) = self.file.take() {
            file.close()?;
        }
        Ok(())
    }
}

impl Drop for ParquetRowReader {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "Failed to close parquet reader");
        }
    }
}
