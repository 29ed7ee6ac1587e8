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

//! Record keys and their string form in delete blocks.
//!
//! A table with one key column stores the bare value. A table with several
//! stores `field:value` pairs joined by commas.

use std::fmt;

use itertools::Itertools;
use serde_derive::{Deserialize, Serialize};

use crate::spec::{Datum, PrimitiveType, Record, Schema};
use crate::{Error, ErrorKind, Result};

const NULL_PLACEHOLDER: &str = "__null__";
const EMPTY_PLACEHOLDER: &str = "__empty__";
const FIELD_SEPARATOR: char = ',';
const VALUE_SEPARATOR: char = ':';

/// Typed values of the record key columns, in key field order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey(pub Vec<Option<Datum>>);

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.0.iter().map(|v| match v {
            Some(datum) => datum.to_string(),
            None => NULL_PLACEHOLDER.to_string(),
        });
        write!(f, "{}", parts.format(","))
    }
}

/// Extracts, encodes and decodes record keys for one table.
#[derive(Debug, Clone)]
pub struct RecordKeyCodec {
    fields: Vec<String>,
    indices: Vec<usize>,
    types: Vec<PrimitiveType>,
}

impl RecordKeyCodec {
    /// Resolves the key fields against the table schema.
    pub fn try_new(schema: &Schema, fields: &[String]) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::new(
                ErrorKind::ConfigInvalid,
                "Record key fields must not be empty",
            ));
        }
        let indices = schema.field_indices(fields)?;
        let types = indices
            .iter()
            .filter_map(|idx| schema.field(*idx).map(|f| f.field_type))
            .collect();
        Ok(Self {
            fields: fields.to_vec(),
            indices,
            types,
        })
    }

    /// Table column indices of the key fields.
    pub fn key_indices(&self) -> &[usize] {
        &self.indices
    }

    /// Key of a decoded row.
    pub fn key_of(&self, record: &Record) -> RecordKey {
        RecordKey(record.project(&self.indices))
    }

    /// String form of the key of `record`.
    pub fn encode(&self, record: &Record) -> String {
        let value_str = |idx: usize| match record.get(idx) {
            None => NULL_PLACEHOLDER.to_string(),
            Some(Datum::String(s)) if s.is_empty() => EMPTY_PLACEHOLDER.to_string(),
            Some(datum) => datum.to_string(),
        };
        if self.indices.len() == 1 {
            return value_str(self.indices[0]);
        }
        self.fields
            .iter()
            .zip(&self.indices)
            .map(|(field, idx)| format!("{field}{VALUE_SEPARATOR}{}", value_str(*idx)))
            .join(&FIELD_SEPARATOR.to_string())
    }

    /// Parses the string form of a key.
    pub fn decode(&self, key: &str) -> Result<RecordKey> {
        if self.fields.len() == 1 {
            let field = &self.fields[0];
            let value = key
                .strip_prefix(field.as_str())
                .and_then(|rest| rest.strip_prefix(VALUE_SEPARATOR))
                .unwrap_or(key);
            if value.is_empty() {
                return Err(malformed(key, "empty record key"));
            }
            return Ok(RecordKey(vec![self.parse_value(0, value, key)?]));
        }

        let mut values = vec![None; self.fields.len()];
        let mut seen = vec![false; self.fields.len()];
        for segment in key.split(FIELD_SEPARATOR) {
            let (field, value) = segment
                .split_once(VALUE_SEPARATOR)
                .ok_or_else(|| malformed(key, "segment without ':' separator"))?;
            if field.is_empty() || value.is_empty() {
                return Err(malformed(key, "empty field or value segment"));
            }
            let pos = self
                .fields
                .iter()
                .position(|f| f == field)
                .ok_or_else(|| malformed(key, "unknown key field"))?;
            if seen[pos] {
                return Err(malformed(key, "duplicate key field"));
            }
            values[pos] = self.parse_value(pos, value, key)?;
            seen[pos] = true;
        }
        if seen.iter().any(|s| !s) {
            return Err(malformed(key, "missing key field"));
        }
        Ok(RecordKey(values))
    }

    fn parse_value(&self, pos: usize, value: &str, key: &str) -> Result<Option<Datum>> {
        match value {
            NULL_PLACEHOLDER => Ok(None),
            EMPTY_PLACEHOLDER => Ok(Some(Datum::string(""))),
            value => Datum::parse(self.types[pos], value).map(Some).map_err(|e| {
                malformed(key, "key value doesn't match the column type").with_source(e)
            }),
        }
    }

    /// Writes the key values into a row of table arity.
    pub fn stamp(&self, key: &RecordKey, record: &mut Record) {
        for (idx, value) in self.indices.iter().zip(&key.0) {
            record.set(*idx, value.clone());
        }
    }
}

fn malformed(key: &str, reason: &str) -> Error {
    Error::new(
        ErrorKind::MalformedDeleteKey,
        format!("Malformed record key '{key}': {reason}"),
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::spec::Field;

    fn schema() -> Schema {
        Schema::builder()
            .with_fields([
                Field::required("id", PrimitiveType::Long),
                Field::optional("region", PrimitiveType::String),
                Field::optional("v", PrimitiveType::Long),
            ])
            .build()
            .unwrap()
    }

    fn codec(fields: &[&str]) -> RecordKeyCodec {
        let fields = fields.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        RecordKeyCodec::try_new(&schema(), &fields).unwrap()
    }

    #[test]
    fn test_single_field_key() {
        let codec = codec(&["id"]);
        assert_eq!(codec.decode("42").unwrap(), RecordKey(vec![Some(Datum::Long(42))]));
        assert_eq!(
            codec.decode("id:42").unwrap(),
            RecordKey(vec![Some(Datum::Long(42))])
        );
        assert_eq!(codec.decode("__null__").unwrap(), RecordKey(vec![None]));
    }

    #[test]
    fn test_composite_key_round_trip() {
        let codec = codec(&["id", "region"]);
        let record = Record::from_values(vec![
            Some(Datum::Long(7)),
            Some(Datum::string("")),
            Some(Datum::Long(1)),
        ]);
        let encoded = codec.encode(&record);
        assert_eq!(encoded, "id:7,region:__empty__");
        assert_eq!(codec.decode(&encoded).unwrap(), codec.key_of(&record));
        assert_eq!(
            codec.decode("region:eu,id:1").unwrap(),
            RecordKey(vec![Some(Datum::Long(1)), Some(Datum::string("eu"))])
        );
    }

    #[rstest]
    #[case("id:1,region")]
    #[case("id:1,region:")]
    #[case("id:1,:eu")]
    #[case("id:1")]
    #[case("id:1,zone:eu")]
    #[case("id:x,region:eu")]
    fn test_malformed_composite_key(#[case] key: &str) {
        assert_eq!(
            codec(&["id", "region"]).decode(key).unwrap_err().kind(),
            ErrorKind::MalformedDeleteKey
        );
    }

    #[rstest]
    #[case("id:1,id:2,region:eu")]
    #[case("id:1,region:eu,region:us")]
    #[case("id:1,region:eu,id:1")]
    fn test_duplicate_key_field(#[case] key: &str) {
        let err = codec(&["id", "region"]).decode(key).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeleteKey);
        assert!(err.message().contains("duplicate key field"));
    }

    #[test]
    fn test_empty_single_key() {
        assert_eq!(
            codec(&["region"]).decode("").unwrap_err().kind(),
            ErrorKind::MalformedDeleteKey
        );
    }
}
