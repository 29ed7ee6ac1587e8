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

//! Avro decoding: container files, and the value conversions shared with the
//! Hudi log data blocks.

use std::collections::HashMap;

use apache_avro::types::Value;
use apache_avro::{Reader as AvroReader, Schema as AvroSchema};
use bytes::{Buf, Bytes};
use serde_json::{Value as JsonValue, json};

use super::{ReadRequest, RowReader};
use crate::spec::{Datum, PrimitiveType, Record, Schema};
use crate::{Error, ErrorKind, Result};

/// Converts one avro value into a datum. `null` maps to `None`.
pub fn avro_value_to_datum(value: &Value) -> Result<Option<Datum>> {
    let datum = match value {
        Value::Null => return Ok(None),
        Value::Union(_, inner) => return avro_value_to_datum(inner),
        Value::Boolean(v) => Datum::Boolean(*v),
        Value::Int(v) => Datum::Int(*v),
        Value::Long(v) => Datum::Long(*v),
        Value::Float(v) => Datum::float(*v),
        Value::Double(v) => Datum::double(*v),
        Value::String(v) => Datum::String(v.clone()),
        Value::Enum(_, symbol) => Datum::String(symbol.clone()),
        Value::Bytes(v) | Value::Fixed(_, v) => Datum::Binary(v.clone()),
        Value::Date(v) => Datum::Date(*v),
        Value::TimestampMillis(v) | Value::LocalTimestampMillis(v) => {
            Datum::Timestamp(v.saturating_mul(1000))
        }
        Value::TimestampMicros(v) | Value::LocalTimestampMicros(v) => Datum::Timestamp(*v),
        Value::Uuid(v) => Datum::String(v.to_string()),
        other => {
            return Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("Unsupported avro value {other:?}"),
            ));
        }
    };
    Ok(Some(datum))
}

/// Converts a datum into the avro value written for it.
pub fn datum_to_avro_value(datum: &Datum) -> Value {
    match datum {
        Datum::Boolean(v) => Value::Boolean(*v),
        Datum::Int(v) => Value::Int(*v),
        Datum::Long(v) => Value::Long(*v),
        Datum::Float(v) => Value::Float(v.0),
        Datum::Double(v) => Value::Double(v.0),
        Datum::String(v) => Value::String(v.clone()),
        Datum::Binary(v) => Value::Bytes(v.clone()),
        Datum::Date(v) => Value::Date(*v),
        Datum::Timestamp(v) => Value::TimestampMicros(*v),
    }
}

fn avro_type(ty: PrimitiveType) -> JsonValue {
    match ty {
        PrimitiveType::Boolean => json!("boolean"),
        PrimitiveType::Int => json!("int"),
        PrimitiveType::Long => json!("long"),
        PrimitiveType::Float => json!("float"),
        PrimitiveType::Double => json!("double"),
        PrimitiveType::String => json!("string"),
        PrimitiveType::Binary => json!("bytes"),
        PrimitiveType::Date => json!({"type": "int", "logicalType": "date"}),
        PrimitiveType::Timestamp => json!({"type": "long", "logicalType": "timestamp-micros"}),
    }
}

/// Avro record schema with one nullable field per table column.
pub fn avro_schema_for(schema: &Schema, name: &str) -> Result<AvroSchema> {
    let fields = schema
        .fields()
        .iter()
        .map(|field| {
            json!({
                "name": field.name,
                "type": ["null", avro_type(field.field_type)],
                "default": null,
            })
        })
        .collect::<Vec<_>>();
    let json = json!({"type": "record", "name": name, "fields": fields});
    Ok(AvroSchema::parse_str(&json.to_string())?)
}

/// Builds the avro record value for a row, resolved against `avro_schema`.
pub fn record_to_avro_value(
    schema: &Schema,
    avro_schema: &AvroSchema,
    record: &Record,
) -> Result<Value> {
    let fields = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let value = record.get(idx).map(datum_to_avro_value).unwrap_or(Value::Null);
            (field.name.clone(), value)
        })
        .collect();
    Ok(Value::Record(fields).resolve(avro_schema)?)
}

/// Maps the fields of an avro record onto table columns by name.
pub(crate) fn avro_value_to_record(
    value: &Value,
    columns: &HashMap<String, (usize, PrimitiveType)>,
    arity: usize,
) -> Result<Record> {
    let Value::Record(fields) = value else {
        return Err(Error::new(
            ErrorKind::DataInvalid,
            format!("Expected an avro record, got {value:?}"),
        ));
    };
    let mut record = Record::new_null(arity);
    for (name, field_value) in fields {
        if let Some((idx, ty)) = columns.get(name) {
            let datum = avro_value_to_datum(field_value)?
                .map(|datum| datum.coerce(*ty))
                .transpose()?;
            record.set(*idx, datum);
        }
    }
    Ok(record)
}

/// Streams rows of an avro container file held in memory.
pub struct AvroRowReader {
    rows: Option<AvroReader<'static, bytes::buf::Reader<Bytes>>>,
    columns: HashMap<String, (usize, PrimitiveType)>,
    arity: usize,
    position: u64,
}

impl AvroRowReader {
    /// Opens a reader over the bytes of a container file.
    pub fn try_new(bytes: Bytes, request: &ReadRequest) -> Result<Self> {
        Ok(Self {
            rows: Some(AvroReader::new(bytes.reader())?),
            columns: request.projected_columns(),
            arity: request.schema.len(),
            position: 0,
        })
    }
}

impl RowReader for AvroRowReader {
    fn next_row(&mut self) -> Result<Option<Record>> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };
        let Some(value) = rows.next() else {
            return Ok(None);
        };
        let record = avro_value_to_record(&value?, &self.columns, self.arity)?
            .with_position(self.position);
        self.position += 1;
        Ok(Some(record))
    }

    fn close(&mut self) -> Result<()> {
        self.rows = None;
        Ok(())
    }
}
