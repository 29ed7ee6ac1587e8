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

use std::collections::BTreeSet;

use typed_builder::TypedBuilder;

/// Table-level options supplied by the catalog for one scan.
///
/// They are constant for the whole scan.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct TableOptions {
    /// Columns forming the logical record key.
    #[builder(default, setter(into))]
    pub record_key_fields: Vec<String>,
    /// Column breaking version ties between two rows with the same key. Larger wins.
    #[builder(default, setter(strip_option, into))]
    pub precombine_field: Option<String>,
    /// Partition columns, in partition path order.
    #[builder(default, setter(into))]
    pub partition_fields: Vec<String>,
    /// Whether the table is partitioned at all.
    #[builder(default)]
    pub is_partitioned: bool,
    /// Whether partition values must be parsed from file paths rather than
    /// read from the data files.
    #[builder(default)]
    pub extract_partition_from_path: bool,
    /// Whether partition path segments are `key=value` (hive style) or bare values.
    #[builder(default)]
    pub hive_style_partitioning: bool,
    /// Completed commit instants.
    #[builder(default)]
    pub completed_instants: BTreeSet<String>,
    /// In-flight commit instants.
    #[builder(default)]
    pub inflight_instants: BTreeSet<String>,
    /// First commit that is not a savepoint. Instants sorting before it have
    /// been archived and count as completed.
    #[builder(default, setter(strip_option, into))]
    pub first_non_savepoint_commit: Option<String>,
}

impl TableOptions {
    /// Whether a record key is configured.
    pub fn has_record_key(&self) -> bool {
        !self.record_key_fields.is_empty()
    }

    /// Whether partition values have to be stamped from the file path.
    pub fn partition_values_from_path(&self) -> bool {
        self.is_partitioned && self.extract_partition_from_path && !self.partition_fields.is_empty()
    }
}
