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

use serde_derive::{Deserialize, Serialize};

use crate::spec::{DataContentType, FileFragment, Projection};

/// A unit of work assigned to one worker: a data file slice and the change
/// files that apply to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileScanTask {
    /// The start offset of the data file to scan.
    pub start: u64,
    /// The length of the data file to scan. Zero means up to the end.
    pub length: u64,
    /// Base data file. Missing for log-only file groups.
    pub data_file: Option<FileFragment>,
    /// Delete and delta log fragments, in the order they must be applied.
    /// They only apply to this task's data file.
    #[serde(default)]
    pub deletes: Vec<FileFragment>,
    /// Instant to read as of, overriding the scan's target instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instant: Option<String>,
    /// Columns requested by the caller.
    pub projection: Projection,
}

impl FileScanTask {
    /// A task over the whole of `data_file`.
    pub fn new(data_file: Option<FileFragment>, projection: Projection) -> Self {
        Self {
            start: 0,
            length: 0,
            data_file,
            deletes: vec![],
            instant: None,
            projection,
        }
    }

    /// Sets the change files of the task.
    pub fn with_deletes(mut self, deletes: Vec<FileFragment>) -> Self {
        self.deletes = deletes;
        self
    }

    /// Restricts the task to a byte range of its data file.
    pub fn with_range(mut self, start: u64, length: u64) -> Self {
        self.start = start;
        self.length = length;
        self
    }

    /// Sets the instant this task reads as of.
    pub fn with_instant(mut self, instant: impl Into<String>) -> Self {
        self.instant = Some(instant.into());
        self
    }

    /// Returns the data file path of this task, if any.
    pub fn data_file_path(&self) -> Option<&str> {
        self.data_file.as_ref().map(|f| f.file_path.as_str())
    }

    /// Fragments of one content kind, in order.
    pub fn deletes_of(&self, content: DataContentType) -> Vec<FileFragment> {
        self.deletes
            .iter()
            .filter(|f| f.content == content)
            .cloned()
            .collect()
    }
}
