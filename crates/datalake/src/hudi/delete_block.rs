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

//! Payload of delete blocks.
//!
//! `int32 version | int32 length | avro datum`. Version 1 stores an array of
//! `{recordKey, partitionPath}`. Version 2 stores a record wrapping an array of
//! `{recordKey, partitionPath, orderingVal}` with nullable fields.

use std::sync::LazyLock;

use apache_avro::types::Value;
use apache_avro::{Schema as AvroSchema, from_avro_datum, to_avro_datum};
use bytes::{Buf, BufMut, BytesMut};

use super::log_format::{BlockMetadata, HeaderMetadataType, LogBlock, LogBlockType};
use crate::reader::{avro_value_to_datum, datum_to_avro_value};
use crate::spec::Datum;
use crate::{Error, ErrorKind, Result};

/// Delete payload version 1: keys with partition paths.
pub const DELETE_BLOCK_VERSION_1: i32 = 1;
/// Delete payload version 2: keys with ordering values.
pub const DELETE_BLOCK_VERSION_2: i32 = 2;

static DELETE_KEYS_V1_SCHEMA: LazyLock<Result<AvroSchema>> = LazyLock::new(|| {
    Ok(AvroSchema::parse_str(
        r#"{
            "type": "array",
            "items": {
                "type": "record",
                "name": "HoodieKey",
                "fields": [
                    {"name": "recordKey", "type": "string"},
                    {"name": "partitionPath", "type": "string"}
                ]
            }
        }"#,
    )?)
});

static DELETE_KEYS_V2_SCHEMA: LazyLock<Result<AvroSchema>> = LazyLock::new(|| {
    Ok(AvroSchema::parse_str(
        r#"{
            "type": "record",
            "name": "HoodieDeleteRecordList",
            "fields": [{
                "name": "deleteRecordList",
                "type": {
                    "type": "array",
                    "items": {
                        "type": "record",
                        "name": "HoodieDeleteRecord",
                        "fields": [
                            {"name": "recordKey", "type": ["null", "string"], "default": null},
                            {"name": "partitionPath", "type": ["null", "string"], "default": null},
                            {"name": "orderingVal", "type": ["null", "boolean", "int", "long", "float", "double", "bytes", "string"], "default": null}
                        ]
                    }
                }
            }]
        }"#,
    )?)
});

fn schema_of(schema: &'static LazyLock<Result<AvroSchema>>) -> Result<&'static AvroSchema> {
    schema.as_ref().map_err(|e| {
        Error::new(
            ErrorKind::Unexpected,
            format!("Invalid built-in delete key schema: {e}"),
        )
    })
}

/// One deleted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteKey {
    /// String form of the record key.
    pub record_key: String,
    /// Partition path of the deleted record, if recorded.
    pub partition_path: Option<String>,
    /// Precombine value of the delete. A delete without one always applies.
    pub ordering_value: Option<Datum>,
}

impl DeleteKey {
    /// Delete of `record_key` without ordering value.
    pub fn new(record_key: impl Into<String>) -> Self {
        Self {
            record_key: record_key.into(),
            partition_path: None,
            ordering_value: None,
        }
    }

    /// Sets the partition path.
    pub fn with_partition_path(mut self, partition_path: impl Into<String>) -> Self {
        self.partition_path = Some(partition_path.into());
        self
    }

    /// Sets the ordering value.
    pub fn with_ordering_value(mut self, ordering_value: Datum) -> Self {
        self.ordering_value = Some(ordering_value);
        self
    }
}

fn malformed(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::MalformedDeleteKey, message)
}

fn record_field<'a>(fields: &'a [(String, Value)], name: &str) -> Option<&'a Value> {
    fields
        .iter()
        .find(|(field, _)| field == name)
        .map(|(_, value)| value)
}

fn string_field(fields: &[(String, Value)], name: &str) -> Result<Option<String>> {
    Ok(
        match record_field(fields, name).map(avro_value_to_datum).transpose()?.flatten() {
            Some(Datum::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
            None => None,
        },
    )
}

/// Decodes the keys of a delete block. Errors name the block's file and
/// offset.
pub fn decode_delete_block(block: &LogBlock) -> Result<Vec<DeleteKey>> {
    decode_keys(block).map_err(|e| block.locate(e))
}

fn decode_keys(block: &LogBlock) -> Result<Vec<DeleteKey>> {
    let mut content = block.content().clone();
    if content.remaining() < 8 {
        return Err(malformed("Delete block is too short"));
    }
    let version = content.get_i32();
    let len = usize::try_from(content.get_i32()).unwrap_or(usize::MAX);
    if content.remaining() < len {
        return Err(malformed("Delete block payload is truncated"));
    }
    let payload = content.split_to(len);

    let items = match version {
        DELETE_BLOCK_VERSION_1 => {
            match from_avro_datum(schema_of(&DELETE_KEYS_V1_SCHEMA)?, &mut &payload[..], None)? {
                Value::Array(items) => items,
                other => return Err(malformed(format!("Unexpected v1 payload {other:?}"))),
            }
        }
        DELETE_BLOCK_VERSION_2 => {
            match from_avro_datum(schema_of(&DELETE_KEYS_V2_SCHEMA)?, &mut &payload[..], None)? {
                Value::Record(fields) => match record_field(&fields, "deleteRecordList") {
                    Some(Value::Array(items)) => items.clone(),
                    _ => return Err(malformed("v2 payload has no delete record list")),
                },
                other => return Err(malformed(format!("Unexpected v2 payload {other:?}"))),
            }
        }
        version => {
            return Err(malformed(format!("Unknown delete block version {version}")));
        }
    };

    items
        .into_iter()
        .map(|item| {
            let Value::Record(fields) = item else {
                return Err(malformed("Delete key is not a record"));
            };
            let record_key = string_field(&fields, "recordKey")?
                .ok_or_else(|| malformed("Delete key without record key"))?;
            let partition_path = string_field(&fields, "partitionPath")?;
            let ordering_value = match record_field(&fields, "orderingVal") {
                Some(value) => avro_value_to_datum(value)?,
                None => None,
            };
            Ok(DeleteKey {
                record_key,
                partition_path,
                ordering_value,
            })
        })
        .collect()
}

/// Builds a delete block in the given payload version, written at `instant`.
pub fn delete_block(keys: &[DeleteKey], version: i32, instant: &str) -> Result<LogBlock> {
    let (schema, value) = match version {
        DELETE_BLOCK_VERSION_1 => {
            let items = keys
                .iter()
                .map(|key| {
                    Value::Record(vec![
                        ("recordKey".to_string(), Value::String(key.record_key.clone())),
                        (
                            "partitionPath".to_string(),
                            Value::String(key.partition_path.clone().unwrap_or_default()),
                        ),
                    ])
                })
                .collect();
            (schema_of(&DELETE_KEYS_V1_SCHEMA)?, Value::Array(items))
        }
        DELETE_BLOCK_VERSION_2 => {
            let nullable = |v: Option<Value>| v.unwrap_or(Value::Null);
            let items = keys
                .iter()
                .map(|key| {
                    Value::Record(vec![
                        ("recordKey".to_string(), Value::String(key.record_key.clone())),
                        (
                            "partitionPath".to_string(),
                            nullable(key.partition_path.clone().map(Value::String)),
                        ),
                        (
                            "orderingVal".to_string(),
                            nullable(key.ordering_value.as_ref().map(datum_to_avro_value)),
                        ),
                    ])
                })
                .collect();
            let list = Value::Record(vec![("deleteRecordList".to_string(), Value::Array(items))]);
            (schema_of(&DELETE_KEYS_V2_SCHEMA)?, list)
        }
        version => {
            return Err(Error::new(
                ErrorKind::MalformedDeleteKey,
                format!("Unknown delete block version {version}"),
            ));
        }
    };

    let payload = to_avro_datum(schema, value.resolve(schema)?)?;
    let mut content = BytesMut::new();
    content.put_i32(version);
    content.put_i32(i32::try_from(payload.len())?);
    content.put_slice(&payload);

    let header = BlockMetadata::from([(HeaderMetadataType::InstantTime, instant.to_string())]);
    Ok(LogBlock::new(LogBlockType::Delete, header, content.freeze()))
}
