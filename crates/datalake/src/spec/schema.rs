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

//! Table columns and the caller's projection over them.

use std::collections::HashMap;
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};

use crate::spec::{PrimitiveType, Record};
use crate::{Error, ErrorKind, Result};

/// Reference to [`Schema`].
pub type SchemaRef = Arc<Schema>;

/// A table column.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Field {
    /// Column name, unique within the schema.
    pub name: String,
    /// Column type.
    pub field_type: PrimitiveType,
    /// Whether the column can hold nulls.
    pub required: bool,
}

impl Field {
    /// Creates an optional column.
    pub fn optional(name: impl Into<String>, field_type: PrimitiveType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Creates a required column.
    pub fn required(name: impl Into<String>, field_type: PrimitiveType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }
}

/// Ordered list of table columns. Row values are indexed by position in
/// this list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
    name_to_index: HashMap<String, usize>,
}

/// Builder for [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<Field>,
}

impl SchemaBuilder {
    /// Appends columns.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Builds the schema, rejecting duplicated column names.
    pub fn build(self) -> Result<Schema> {
        let mut name_to_index = HashMap::with_capacity(self.fields.len());
        for (idx, field) in self.fields.iter().enumerate() {
            if name_to_index.insert(field.name.clone(), idx).is_some() {
                return Err(Error::new(
                    ErrorKind::ConfigInvalid,
                    format!("Duplicated column name '{}' in schema", field.name),
                ));
            }
        }
        Ok(Schema {
            fields: self.fields,
            name_to_index,
        })
    }
}

impl Schema {
    /// Create a schema builder.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// All columns.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no column.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Column at a position.
    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    /// Position of a column by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Resolves column names to positions, failing on the first unknown name.
    pub fn field_indices<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                self.field_index(name.as_ref()).ok_or_else(|| {
                    Error::new(
                        ErrorKind::ConfigInvalid,
                        format!("Column '{}' not found in table schema", name.as_ref()),
                    )
                })
            })
            .collect()
    }
}

/// The caller's column selection: one "used" flag per table column.
///
/// Rows always keep the table's arity; columns that are not used are
/// emitted as nulls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    used: Vec<bool>,
}

impl Projection {
    /// Every column used.
    pub fn all(schema: &Schema) -> Self {
        Self {
            used: vec![true; schema.len()],
        }
    }

    /// Uses the given per-column flags.
    pub fn from_used(used: Vec<bool>) -> Self {
        Self { used }
    }

    /// Uses exactly the named columns.
    pub fn select<S: AsRef<str>>(schema: &Schema, names: &[S]) -> Result<Self> {
        let mut used = vec![false; schema.len()];
        for idx in schema.field_indices(names)? {
            used[idx] = true;
        }
        Ok(Self { used })
    }

    /// Whether column `idx` is requested.
    pub fn is_used(&self, idx: usize) -> bool {
        self.used.get(idx).copied().unwrap_or(false)
    }

    /// Indices of the requested columns.
    pub fn used_indices(&self) -> Vec<usize> {
        self.used
            .iter()
            .enumerate()
            .filter_map(|(idx, used)| used.then_some(idx))
            .collect()
    }

    /// Returns a projection that also reads the given columns.
    pub fn with_forced(&self, indices: &[usize]) -> Self {
        let mut used = self.used.clone();
        for idx in indices {
            if let Some(slot) = used.get_mut(*idx) {
                *slot = true;
            }
        }
        Self { used }
    }

    /// Nulls every column this projection does not request.
    pub fn hide_unused(&self, record: &mut Record) {
        for idx in 0..record.arity() {
            if !self.is_used(idx) {
                record.set(idx, None);
            }
        }
    }
}
