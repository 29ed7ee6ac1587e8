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

//! Payloads of data blocks.
//!
//! An avro data block holds `int32 version | int32 record count` followed by
//! `int32 length | avro datum` per record, encoded with the schema stored in
//! the block header. A parquet data block embeds a whole parquet file.

use std::collections::HashMap;

use apache_avro::{Schema as AvroSchema, from_avro_datum, to_avro_datum};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::log_format::{BlockMetadata, HeaderMetadataType, LogBlock, LogBlockType};
use crate::reader::{
    BoxedRowReader, FormatReaderFactory, ReadRequest, RowReader, avro_schema_for,
    avro_value_to_record, record_to_avro_value,
};
use crate::spec::{DataFileFormat, PrimitiveType, Record, Schema};
use crate::{Error, ErrorKind, Result, ensure_data_valid};

/// Content version written for avro data blocks.
pub const AVRO_DATA_BLOCK_VERSION: i32 = 3;

/// Opens a row reader over the records of a data block.
pub fn data_block_rows(
    block: &LogBlock,
    factory: &dyn FormatReaderFactory,
    request: &ReadRequest,
) -> Result<BoxedRowReader> {
    match block.block_type() {
        LogBlockType::AvroData => Ok(Box::new(AvroDataBlockReader::try_new(block, request)?)),
        LogBlockType::ParquetData => {
            factory.open_bytes(block.content().clone(), DataFileFormat::Parquet, request)
        }
        other => Err(Error::new(
            ErrorKind::Unexpected,
            format!("{other} block doesn't carry records"),
        )),
    }
}

/// Streams the records of an avro data block.
pub struct AvroDataBlockReader {
    content: Bytes,
    remaining: usize,
    schema: AvroSchema,
    columns: HashMap<String, (usize, PrimitiveType)>,
    arity: usize,
    file_path: String,
    offset: u64,
}

impl AvroDataBlockReader {
    /// Parses the block header and content prefix.
    pub fn try_new(block: &LogBlock, request: &ReadRequest) -> Result<Self> {
        let location = block.location();
        let schema_json = block.schema().ok_or_else(|| {
            Error::new(
                ErrorKind::MalformedMetadata,
                "Avro data block has no schema in its header",
            )
            .with_context("file", location.file_path.clone())
            .with_context("offset", location.offset.to_string())
        })?;
        let schema = AvroSchema::parse_str(schema_json)?;

        let mut content = block.content().clone();
        ensure_data_valid!(
            content.remaining() >= 8,
            "Avro data block at {}:{} is too short",
            location.file_path,
            location.offset
        );
        let version = content.get_i32();
        ensure_data_valid!(
            version > 0,
            "Unsupported avro data block version {} at {}:{}",
            version,
            location.file_path,
            location.offset
        );
        let count = content.get_i32();
        let remaining = usize::try_from(count).map_err(|_| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("Negative record count {count} in avro data block"),
            )
            .with_context("file", location.file_path.clone())
            .with_context("offset", location.offset.to_string())
        })?;

        Ok(Self {
            content,
            remaining,
            schema,
            columns: request.projected_columns(),
            arity: request.schema.len(),
            file_path: location.file_path.clone(),
            offset: location.offset,
        })
    }
}

impl RowReader for AvroDataBlockReader {
    fn next_row(&mut self) -> Result<Option<Record>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        ensure_data_valid!(
            self.content.remaining() >= 4,
            "Truncated record length in avro data block at {}:{}",
            self.file_path,
            self.offset
        );
        let len = self.content.get_i32();
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        ensure_data_valid!(
            self.content.remaining() >= len,
            "Truncated record in avro data block at {}:{}",
            self.file_path,
            self.offset
        );
        let datum = self.content.split_to(len);
        let value = from_avro_datum(&self.schema, &mut &datum[..], None)?;
        self.remaining -= 1;
        Ok(Some(avro_value_to_record(&value, &self.columns, self.arity)?))
    }

    fn close(&mut self) -> Result<()> {
        self.remaining = 0;
        self.content = Bytes::new();
        Ok(())
    }
}

/// Builds an avro data block for `records`, written at `instant`.
pub fn avro_data_block(schema: &Schema, records: &[Record], instant: &str) -> Result<LogBlock> {
    let avro_schema = avro_schema_for(schema, "hoodie_record")?;
    let mut content = BytesMut::new();
    content.put_i32(AVRO_DATA_BLOCK_VERSION);
    content.put_i32(i32::try_from(records.len())?);
    for record in records {
        let value = record_to_avro_value(schema, &avro_schema, record)?;
        let datum = to_avro_datum(&avro_schema, value)?;
        content.put_i32(i32::try_from(datum.len())?);
        content.put_slice(&datum);
    }

    let header = BlockMetadata::from([
        (HeaderMetadataType::InstantTime, instant.to_string()),
        (HeaderMetadataType::Schema, serde_json::to_string(&avro_schema)?),
    ]);
    Ok(LogBlock::new(LogBlockType::AvroData, header, content.freeze()))
}

/// Builds a parquet data block embedding `parquet_file`.
pub fn parquet_data_block(
    schema: &Schema,
    parquet_file: Bytes,
    instant: &str,
) -> Result<LogBlock> {
    let avro_schema = avro_schema_for(schema, "hoodie_record")?;
    let header = BlockMetadata::from([
        (HeaderMetadataType::InstantTime, instant.to_string()),
        (HeaderMetadataType::Schema, serde_json::to_string(&avro_schema)?),
    ]);
    Ok(LogBlock::new(LogBlockType::ParquetData, header, parquet_file))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::reader::{DefaultFormatReaderFactory, collect_rows};
    use crate::spec::{Datum, Projection};
    use crate::test_utils::{id_v_ts_schema, long_column, parquet_bytes};

    #[test]
    fn test_avro_data_block_rows() {
        let schema = id_v_ts_schema();
        let records = vec![
            Record::from_values(vec![
                Some(Datum::Long(1)),
                Some(Datum::Long(10)),
                Some(Datum::Long(100)),
                None,
            ]),
            Record::from_values(vec![Some(Datum::Long(2)), None, Some(Datum::Long(5)), None]),
        ];
        let block = avro_data_block(&schema, &records, "001").unwrap();
        assert_eq!(block.instant_time(), Some("001"));

        let request = ReadRequest::whole_file(schema.clone(), Projection::all(&schema));
        let mut rows = data_block_rows(&block, &DefaultFormatReaderFactory, &request).unwrap();
        assert_eq!(collect_rows(&mut rows).unwrap(), records);
    }

    #[test]
    fn test_parquet_data_block_rows() {
        let schema = id_v_ts_schema();
        let file = parquet_bytes(
            vec![("id", long_column(&[5])), ("v", long_column(&[2]))],
            None,
        );
        let block = parquet_data_block(&schema, file, "002").unwrap();

        let request = ReadRequest::whole_file(schema.clone(), Projection::all(&schema));
        let mut rows = data_block_rows(&block, &DefaultFormatReaderFactory, &request).unwrap();
        let rows = collect_rows(&mut rows).unwrap();
        assert_eq!(rows[0].values(), &[
            Some(Datum::Long(5)),
            Some(Datum::Long(2)),
            None,
            None
        ]);
    }

    #[test]
    fn test_missing_schema() {
        let schema = id_v_ts_schema();
        let block = LogBlock::new(LogBlockType::AvroData, BlockMetadata::new(), Bytes::new());
        let request = ReadRequest::whole_file(schema.clone(), Projection::all(&schema));
        assert_eq!(
            AvroDataBlockReader::try_new(&block, &request)
                .err()
                .unwrap()
                .kind(),
            ErrorKind::MalformedMetadata
        );
    }
}
