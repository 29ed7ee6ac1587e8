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

//! Column values and rows.

use std::fmt;

use ordered_float::OrderedFloat;
use serde_derive::{Deserialize, Serialize};

use crate::spec::PrimitiveType;
use crate::{Error, ErrorKind, Result};

/// A single non-null column value.
///
/// Floating point values are wrapped in [`OrderedFloat`] so that every datum
/// is hashable and totally ordered, which record keys, equality delete sets
/// and precombine comparison rely on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Datum {
    /// True or false.
    Boolean(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// 32-bit float.
    Float(OrderedFloat<f32>),
    /// 64-bit float.
    Double(OrderedFloat<f64>),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Days from the unix epoch.
    Date(i32),
    /// Microseconds from the unix epoch.
    Timestamp(i64),
}

impl Datum {
    /// Creates a string datum.
    pub fn string(s: impl Into<String>) -> Self {
        Datum::String(s.into())
    }

    /// Creates a double datum.
    pub fn double(v: f64) -> Self {
        Datum::Double(OrderedFloat(v))
    }

    /// Creates a float datum.
    pub fn float(v: f32) -> Self {
        Datum::Float(OrderedFloat(v))
    }

    /// Returns the primitive type of this datum.
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            Datum::Boolean(_) => PrimitiveType::Boolean,
            Datum::Int(_) => PrimitiveType::Int,
            Datum::Long(_) => PrimitiveType::Long,
            Datum::Float(_) => PrimitiveType::Float,
            Datum::Double(_) => PrimitiveType::Double,
            Datum::String(_) => PrimitiveType::String,
            Datum::Binary(_) => PrimitiveType::Binary,
            Datum::Date(_) => PrimitiveType::Date,
            Datum::Timestamp(_) => PrimitiveType::Timestamp,
        }
    }

    /// Parses the textual form of a value as found in partition paths and
    /// record keys.
    pub fn parse(ty: PrimitiveType, s: &str) -> Result<Datum> {
        let datum = match ty {
            PrimitiveType::Boolean => match s.to_ascii_lowercase().as_str() {
                "true" => Datum::Boolean(true),
                "false" => Datum::Boolean(false),
                _ => {
                    return Err(Error::new(
                        ErrorKind::DataInvalid,
                        format!("Can't parse '{s}' as boolean"),
                    ));
                }
            },
            PrimitiveType::Int => Datum::Int(s.parse()?),
            PrimitiveType::Long => Datum::Long(s.parse()?),
            PrimitiveType::Float => Datum::float(s.parse()?),
            PrimitiveType::Double => Datum::double(s.parse()?),
            PrimitiveType::String => Datum::String(s.to_string()),
            PrimitiveType::Binary => Datum::Binary(s.as_bytes().to_vec()),
            PrimitiveType::Date => Datum::Date(s.parse()?),
            PrimitiveType::Timestamp => Datum::Timestamp(s.parse()?),
        };
        Ok(datum)
    }

    /// Converts this datum into the given column type.
    ///
    /// Only lossless widenings, narrowing of integers that fit, and parsing
    /// of strings are accepted.
    pub fn coerce(self, ty: PrimitiveType) -> Result<Datum> {
        if self.primitive_type() == ty {
            return Ok(self);
        }
        let datum = match (self, ty) {
            (Datum::Int(v), PrimitiveType::Long) => Datum::Long(v as i64),
            (Datum::Int(v), PrimitiveType::Double) => Datum::double(v as f64),
            (Datum::Int(v), PrimitiveType::Date) => Datum::Date(v),
            (Datum::Long(v), PrimitiveType::Int) => Datum::Int(i32::try_from(v)?),
            (Datum::Long(v), PrimitiveType::Timestamp) => Datum::Timestamp(v),
            (Datum::Long(v), PrimitiveType::Double) => Datum::double(v as f64),
            (Datum::Float(v), PrimitiveType::Double) => Datum::double(v.0 as f64),
            (Datum::Date(v), PrimitiveType::Int) => Datum::Int(v),
            (Datum::Timestamp(v), PrimitiveType::Long) => Datum::Long(v),
            (Datum::String(s), ty) => Datum::parse(ty, &s)?,
            (Datum::Binary(b), PrimitiveType::String) => Datum::String(String::from_utf8(b)?),
            (datum, ty) => {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    format!(
                        "Can't convert {} value {datum} to {ty}",
                        datum.primitive_type()
                    ),
                ));
            }
        };
        Ok(datum)
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Boolean(v) => write!(f, "{v}"),
            Datum::Int(v) => write!(f, "{v}"),
            Datum::Long(v) => write!(f, "{v}"),
            Datum::Float(v) => write!(f, "{}", v.0),
            Datum::Double(v) => write!(f, "{}", v.0),
            Datum::String(v) => write!(f, "{v}"),
            Datum::Binary(v) => {
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Datum::Date(v) => write!(f, "{v}"),
            Datum::Timestamp(v) => write!(f, "{v}"),
        }
    }
}

/// One row: a fixed-arity array of nullable values indexed by table column
/// position, plus the physical row position inside its data file when known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    values: Vec<Option<Datum>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<u64>,
}

impl Record {
    /// Creates a record with every column null.
    pub fn new_null(arity: usize) -> Self {
        Self {
            values: vec![None; arity],
            position: None,
        }
    }

    /// Creates a record from its column values.
    pub fn from_values(values: Vec<Option<Datum>>) -> Self {
        Self {
            values,
            position: None,
        }
    }

    /// Sets the physical row position.
    pub fn with_position(mut self, position: u64) -> Self {
        self.position = Some(position);
        self
    }

    /// Physical row position inside the data file, if known.
    pub fn position(&self) -> Option<u64> {
        self.position
    }

    /// Number of columns.
    pub fn arity(&self) -> usize {
        self.values.len()
    }

    /// Value at a column index; `None` for null or out of range.
    pub fn get(&self, idx: usize) -> Option<&Datum> {
        self.values.get(idx).and_then(|v| v.as_ref())
    }

    /// Whether the column at `idx` is null.
    pub fn is_null(&self, idx: usize) -> bool {
        self.get(idx).is_none()
    }

    /// Replaces the value at a column index.
    pub fn set(&mut self, idx: usize, value: Option<Datum>) {
        if let Some(slot) = self.values.get_mut(idx) {
            *slot = value;
        }
    }

    /// All column values.
    pub fn values(&self) -> &[Option<Datum>] {
        &self.values
    }

    /// Consumes the record and returns its column values.
    pub fn into_values(self) -> Vec<Option<Datum>> {
        self.values
    }

    /// Projects the record onto the given column indices.
    pub fn project(&self, indices: &[usize]) -> Vec<Option<Datum>> {
        indices
            .iter()
            .map(|idx| self.values.get(*idx).cloned().flatten())
            .collect()
    }
}
