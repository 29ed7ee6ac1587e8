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

use super::FileScanTask;
use crate::io::{ScopeId, ScopedFileIO};
use crate::reader::BoxedRowReader;
use crate::spec::{Datum, Projection};
use crate::Result;

/// Builds the reader pipeline of one task for a table format.
pub trait TaskReader: Send + Sync {
    /// Resolves what the pipeline of `task` reads, before any file is opened.
    fn plan(&self, task: &FileScanTask) -> Result<TaskPlan>;

    /// Opens the pipeline. Every file is opened through `io` so that it is
    /// released with the task's scope.
    fn open(
        &self,
        io: &ScopedFileIO,
        task: &FileScanTask,
        plan: &TaskPlan,
    ) -> Result<BoxedRowReader>;
}

/// Physical column plan of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPlan {
    /// Values stamped onto every row, by column index.
    pub constants: Vec<(usize, Datum)>,
    /// Columns decoded from files: the caller's projection plus the columns
    /// the filters need.
    pub read_projection: Projection,
}

/// Everything the scan keeps for the task currently being read. Lives in the
/// scan arena and is invalidated when the task ends.
#[derive(Debug)]
pub struct TaskContext {
    /// Scope owning the task's file handles.
    pub scope_id: ScopeId,
    /// Position of the task in the worklist.
    pub ordinal: usize,
    /// Data file of the task.
    pub data_file_path: Option<String>,
    /// Column plan of the task.
    pub plan: TaskPlan,
}
