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

//! Fixtures shared by the integration tests: a table directory on local
//! disk with parquet base files, delete files and delta logs.

#![allow(dead_code)]

use std::sync::Arc;

use arrow_array::{ArrayRef, Int64Array, RecordBatch, StringArray};
use arrow_schema::{Field as ArrowField, Schema as ArrowSchema};
use datalake_reader::hudi::{LogBlock, LogBlockWriter};
use datalake_reader::io::{FileIO, ScanSession};
use datalake_reader::reader::RowReader;
use datalake_reader::spec::{
    DataFileFormat, Datum, Field, FileFragment, PrimitiveType, Record, Schema, SchemaRef,
};
use datalake_reader::Result;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use tempfile::TempDir;

/// A table location backed by a temporary directory.
pub struct TestTable {
    pub tmp_dir: TempDir,
    pub session: ScanSession,
}

impl TestTable {
    pub fn new() -> Self {
        Self {
            tmp_dir: TempDir::new().unwrap(),
            session: ScanSession::new(FileIO::new_with_fs()),
        }
    }

    pub fn path(&self, relative: &str) -> String {
        format!("{}/{relative}", self.tmp_dir.path().to_str().unwrap())
    }

    pub fn write_parquet(
        &self,
        relative: &str,
        columns: Vec<(&str, ArrayRef)>,
        max_row_group: Option<usize>,
    ) -> (String, u64) {
        let path = self.path(relative);
        let fields = columns
            .iter()
            .map(|(name, array)| ArrowField::new(*name, array.data_type().clone(), true))
            .collect::<Vec<_>>();
        let schema = Arc::new(ArrowSchema::new(fields));
        let batch =
            RecordBatch::try_new(schema.clone(), columns.into_iter().map(|(_, a)| a).collect())
                .unwrap();
        let props = WriterProperties::builder()
            .set_max_row_group_size(max_row_group.unwrap_or(1024))
            .build();

        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props)).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        let size = buf.len() as u64;
        self.session
            .file_io()
            .new_output(&path)
            .unwrap()
            .write(buf.into())
            .unwrap();
        (path, size)
    }

    /// Writes a base data file of `id: long, v: long, ts: long` rows.
    pub fn write_base_file(&self, relative: &str, rows: &[(i64, i64, i64)]) -> FileFragment {
        let (path, size) = self.write_parquet(
            relative,
            vec![
                ("id", long_column(rows.iter().map(|r| r.0))),
                ("v", long_column(rows.iter().map(|r| r.1))),
                ("ts", long_column(rows.iter().map(|r| r.2))),
            ],
            None,
        );
        FileFragment::data(path, DataFileFormat::Parquet, rows.len() as u64).with_file_size(size)
    }

    /// Writes a delta log made of `blocks` followed by `trailing` raw bytes.
    pub fn write_log(&self, relative: &str, blocks: &[LogBlock], trailing: &[u8]) -> FileFragment {
        let mut writer = LogBlockWriter::new();
        for block in blocks {
            writer.append(block).unwrap();
        }
        writer.append_raw(trailing);
        let bytes = writer.finish();
        let path = self.path(relative);
        let size = bytes.len() as u64;
        self.session
            .file_io()
            .new_output(&path)
            .unwrap()
            .write(bytes)
            .unwrap();
        FileFragment::delta_log(path, size)
    }
}

pub fn long_column(values: impl IntoIterator<Item = i64>) -> ArrayRef {
    Arc::new(Int64Array::from_iter_values(values))
}

pub fn string_column<'a>(values: impl IntoIterator<Item = &'a str>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values))
}

/// `id: long, v: long, ts: long, dt: string`
pub fn table_schema() -> SchemaRef {
    Arc::new(
        Schema::builder()
            .with_fields([
                Field::required("id", PrimitiveType::Long),
                Field::optional("v", PrimitiveType::Long),
                Field::optional("ts", PrimitiveType::Long),
                Field::optional("dt", PrimitiveType::String),
            ])
            .build()
            .unwrap(),
    )
}

pub fn record(id: i64, v: i64, ts: i64) -> Record {
    Record::from_values(vec![
        Some(Datum::Long(id)),
        Some(Datum::Long(v)),
        Some(Datum::Long(ts)),
        None,
    ])
}

/// Drains `reader` into `(id, v, ts)` tuples. Null columns read as -1.
pub fn drain(reader: &mut dyn RowReader) -> Result<Vec<(i64, i64, i64)>> {
    let long = |row: &Record, idx: usize| match row.get(idx) {
        Some(Datum::Long(v)) => *v,
        _ => -1,
    };
    let mut rows = vec![];
    while let Some(row) = reader.next_row()? {
        rows.push((long(&row, 0), long(&row, 1), long(&row, 2)));
    }
    Ok(rows)
}
