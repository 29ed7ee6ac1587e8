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

//! Fixture builders shared by unit tests.

use std::sync::Arc;

use arrow_array::{ArrayRef, Int64Array, RecordBatch, StringArray};
use arrow_schema::{Field as ArrowField, Schema as ArrowSchema};
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::io::FileIO;
use crate::spec::{Field, PrimitiveType, Schema, SchemaRef};

pub(crate) fn long_column(values: &[i64]) -> ArrayRef {
    Arc::new(Int64Array::from(values.to_vec()))
}

pub(crate) fn opt_long_column(values: &[Option<i64>]) -> ArrayRef {
    Arc::new(Int64Array::from(values.to_vec()))
}

pub(crate) fn string_column(values: &[Option<&str>]) -> ArrayRef {
    Arc::new(StringArray::from(values.to_vec()))
}

/// Encodes `columns` as a parquet file, optionally capping row group size.
pub(crate) fn parquet_bytes(columns: Vec<(&str, ArrayRef)>, max_row_group: Option<usize>) -> Bytes {
    let fields = columns
        .iter()
        .map(|(name, array)| ArrowField::new(*name, array.data_type().clone(), true))
        .collect::<Vec<_>>();
    let schema = Arc::new(ArrowSchema::new(fields));
    let batch =
        RecordBatch::try_new(schema.clone(), columns.into_iter().map(|(_, a)| a).collect())
            .unwrap();

    let mut props = WriterProperties::builder();
    if let Some(max) = max_row_group {
        props = props.set_max_row_group_size(max);
    }
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props.build())).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    Bytes::from(buf)
}

/// Writes a parquet file through `file_io` and returns its size.
pub(crate) fn write_parquet(
    file_io: &FileIO,
    path: &str,
    columns: Vec<(&str, ArrayRef)>,
    max_row_group: Option<usize>,
) -> u64 {
    let bytes = parquet_bytes(columns, max_row_group);
    let size = bytes.len() as u64;
    file_io.new_output(path).unwrap().write(bytes).unwrap();
    size
}

/// `id: long, v: long, ts: long, dt: string`
pub(crate) fn id_v_ts_schema() -> SchemaRef {
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
