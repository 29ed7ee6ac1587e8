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

//! Reading a worklist of file scan tasks as one row stream.

mod context;
mod task;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

pub use context::*;
use serde_derive::{Deserialize, Serialize};
pub use task::*;
use tracing::{debug, warn};

use crate::arena::{Arena, ArenaHandle};
use crate::hudi::HudiTaskReader;
use crate::iceberg::IcebergTaskReader;
use crate::io::{ResourceScope, ScanSession};
use crate::reader::{BoxedRowReader, DefaultFormatReaderFactory, FormatReaderFactory, RowReader};
use crate::spec::{Record, ReaderProperties, SchemaRef, TableOptions};
use crate::{Error, ErrorKind, Result};

/// Table format deciding how change files are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    /// Base files merged with delta logs by record key.
    Hudi,
    /// Base files filtered by position and equality delete files.
    Iceberg,
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableFormat::Hudi => write!(f, "hudi"),
            TableFormat::Iceberg => write!(f, "iceberg"),
        }
    }
}

/// Builder to create a [`ScanReader`].
pub struct ScanReaderBuilder {
    session: ScanSession,
    schema: SchemaRef,
    format: TableFormat,
    options: TableOptions,
    target_instant: Option<String>,
    properties: ReaderProperties,
    factory: Arc<dyn FormatReaderFactory>,
}

impl ScanReaderBuilder {
    /// Sets the table options supplied by the catalog.
    pub fn with_table_options(mut self, options: TableOptions) -> Self {
        self.options = options;
        self
    }

    /// Reads the table as of `instant`.
    pub fn with_target_instant(mut self, instant: impl Into<String>) -> Self {
        self.target_instant = Some(instant.into());
        self
    }

    /// Sets the reader tunables.
    pub fn with_properties(mut self, properties: ReaderProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Sets the decoder factory for data and delete files.
    pub fn with_factory(mut self, factory: Arc<dyn FormatReaderFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Builds the reader over `tasks`, in order.
    ///
    /// Fails with [`ErrorKind::ConfigInvalid`] when the table options name
    /// columns the schema doesn't have.
    pub fn build(self, tasks: Vec<FileScanTask>) -> Result<ScanReader> {
        let task_reader: Box<dyn TaskReader> = match self.format {
            TableFormat::Hudi => Box::new(HudiTaskReader::try_new(
                self.schema,
                self.options,
                self.target_instant,
                self.properties,
                self.factory,
            )?),
            TableFormat::Iceberg => Box::new(IcebergTaskReader::new(
                self.schema,
                self.properties,
                self.factory,
            )),
        };
        debug!(format = %self.format, tasks = tasks.len(), "Built scan reader");
        Ok(ScanReader {
            session: self.session,
            task_reader,
            tasks: tasks.into(),
            current: None,
            arena: Arena::new(),
            tasks_started: 0,
            tasks_completed: 0,
        })
    }
}

struct ActiveTask {
    // Dropped before the scope releases the remaining handles.
    pipeline: BoxedRowReader,
    scope: ResourceScope,
    context: ArenaHandle<TaskContext>,
}

/// Pull-based row stream over a worklist of tasks.
///
/// Tasks are read one at a time in worklist order. Each task gets its own
/// resource scope and arena slot; both are released as soon as the task is
/// exhausted. An error fails the current task only: it is torn down and the
/// error returned, and the next call moves on to the following task.
pub struct ScanReader {
    session: ScanSession,
    task_reader: Box<dyn TaskReader>,
    tasks: VecDeque<FileScanTask>,
    current: Option<ActiveTask>,
    arena: Arena<TaskContext>,
    tasks_started: usize,
    tasks_completed: usize,
}

impl ScanReader {
    /// Starts building a reader over a table with `schema` stored in `format`.
    pub fn builder(
        session: ScanSession,
        schema: SchemaRef,
        format: TableFormat,
    ) -> ScanReaderBuilder {
        ScanReaderBuilder {
            session,
            schema,
            format,
            options: TableOptions::default(),
            target_instant: None,
            properties: ReaderProperties::default(),
            factory: Arc::new(DefaultFormatReaderFactory),
        }
    }

    /// Context of the task being read, if any.
    pub fn current_task(&self) -> Option<&TaskContext> {
        self.current
            .as_ref()
            .and_then(|active| self.arena.get(active.context))
    }

    /// Tasks not started yet.
    pub fn remaining_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Tasks read to the end.
    pub fn tasks_completed(&self) -> usize {
        self.tasks_completed
    }

    fn start_task(&mut self, task: FileScanTask) -> Result<()> {
        let ordinal = self.tasks_started;
        self.tasks_started += 1;

        let scope = self.session.open_scope()?;
        let plan = self.task_reader.plan(&task)?;
        let handle = self.arena.alloc(TaskContext {
            scope_id: scope.id(),
            ordinal,
            data_file_path: task.data_file_path().map(str::to_string),
            plan,
        });
        let context = self.arena.get(handle).ok_or_else(|| {
            Error::new(ErrorKind::Unexpected, "Task context missing from scan arena")
        })?;
        debug!(
            task = ordinal,
            scope = context.scope_id.as_u64(),
            file = context.data_file_path.as_deref().unwrap_or("<log-only>"),
            change_files = task.deletes.len(),
            "Opening task pipeline"
        );
        let pipeline = self.task_reader.open(&scope.file_io(), &task, &context.plan)?;
        self.current = Some(ActiveTask {
            pipeline,
            scope,
            context: handle,
        });
        Ok(())
    }

    /// Closes the current task's pipeline, then releases its scope and arena.
    fn end_task(&mut self) -> Result<()> {
        let Some(ActiveTask {
            mut pipeline,
            mut scope,
            ..
        }) = self.current.take()
        else {
            return Ok(());
        };
        let closed = pipeline.close();
        drop(pipeline);
        let released = scope.release();
        self.arena.reset();

        closed?;
        let leaked = released?;
        if leaked > 0 {
            warn!(
                leaked,
                scope = scope.id().as_u64(),
                "Force-closed leaked file handles"
            );
        }
        Ok(())
    }

    fn fail_task(&mut self, err: Error) -> Error {
        if let Err(close_err) = self.end_task() {
            warn!(%close_err, "Failed to tear down task after error");
        }
        err
    }
}

impl RowReader for ScanReader {
    fn next_row(&mut self) -> Result<Option<Record>> {
        loop {
            if self.current.is_none() {
                let Some(task) = self.tasks.pop_front() else {
                    return Ok(None);
                };
                if let Err(err) = self.start_task(task) {
                    self.arena.reset();
                    return Err(err);
                }
            }
            let next = match self.current.as_mut() {
                Some(active) => active.pipeline.next_row(),
                None => continue,
            };
            match next {
                Ok(Some(row)) => return Ok(Some(row)),
                Ok(None) => {
                    self.end_task()?;
                    self.tasks_completed += 1;
                }
                Err(err) => return Err(self.fail_task(err)),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.tasks.clear();
        self.end_task()
    }
}

impl Drop for ScanReader {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(%err, "Failed to close scan reader");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::io::{Cancellation, FileIO};
    use crate::spec::{DataFileFormat, Datum, FileFragment, Projection};
    use crate::test_utils::{id_v_ts_schema, long_column, opt_long_column, write_parquet};

    fn write_data(session: &ScanSession, path: &str, ids: &[i64]) -> FileFragment {
        let values = ids.iter().map(|id| Some(id * 10)).collect::<Vec<_>>();
        let size = write_parquet(
            session.file_io(),
            path,
            vec![("id", long_column(ids)), ("v", opt_long_column(&values))],
            Some(1),
        );
        FileFragment::data(path, DataFileFormat::Parquet, ids.len() as u64).with_file_size(size)
    }

    fn ids(reader: &mut ScanReader) -> Result<Vec<i64>> {
        let mut ids = vec![];
        while let Some(row) = reader.next_row()? {
            if let Some(Datum::Long(id)) = row.get(0) {
                ids.push(*id);
            }
        }
        Ok(ids)
    }

    #[test]
    fn test_tasks_are_read_in_order() {
        let session = ScanSession::new(FileIO::new_with_memory());
        let schema = id_v_ts_schema();
        let tasks = [
            ("memory:///a.parquet", &[3, 1][..]),
            ("memory:///b.parquet", &[2][..]),
        ]
        .into_iter()
        .map(|(path, ids)| {
            FileScanTask::new(Some(write_data(&session, path, ids)), Projection::all(&schema))
        })
        .collect();

        let mut reader = ScanReader::builder(session.clone(), schema, TableFormat::Iceberg)
            .build(tasks)
            .unwrap();
        assert_eq!(reader.next_row().unwrap().unwrap().get(0), Some(&Datum::Long(3)));
        let context = reader.current_task().unwrap();
        assert_eq!(context.ordinal, 0);
        assert_eq!(context.data_file_path.as_deref(), Some("memory:///a.parquet"));
        assert_eq!(session.registry().open_handles(context.scope_id).unwrap(), 1);
        let first_scope = context.scope_id;

        assert_eq!(ids(&mut reader).unwrap(), vec![1, 2]);
        assert_eq!(reader.tasks_completed(), 2);
        assert!(reader.current_task().is_none());
        assert_eq!(session.registry().open_handles(first_scope).unwrap(), 0);
    }

    #[test]
    fn test_failed_task_is_torn_down() {
        let session = ScanSession::new(FileIO::new_with_memory());
        let schema = id_v_ts_schema();
        let good = write_data(&session, "memory:///good.parquet", &[7]);
        let missing = FileFragment::data("memory:///missing.parquet", DataFileFormat::Parquet, 1);
        let tasks = vec![
            FileScanTask::new(Some(missing), Projection::all(&schema)),
            FileScanTask::new(Some(good), Projection::all(&schema)),
        ];

        let mut reader = ScanReader::builder(session, schema, TableFormat::Iceberg)
            .build(tasks)
            .unwrap();
        let err = reader.next_row().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailed);
        assert!(reader.current_task().is_none());
        assert_eq!(ids(&mut reader).unwrap(), vec![7]);
    }

    #[test]
    fn test_cancellation_unwinds_current_task() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let session = ScanSession::new(FileIO::new_with_memory())
            .with_cancellation(Cancellation::from_fn(move || flag.load(Ordering::SeqCst)));
        let schema = id_v_ts_schema();
        let data = write_data(&session, "memory:///a.parquet", &[1, 2, 3, 4]);

        let mut reader = ScanReader::builder(session.clone(), schema.clone(), TableFormat::Iceberg)
            .build(vec![FileScanTask::new(Some(data), Projection::all(&schema))])
            .unwrap();
        reader.next_row().unwrap();
        let scope = reader.current_task().unwrap().scope_id;

        cancelled.store(true, Ordering::SeqCst);
        let err = reader.next_row().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationCancelled);
        assert_eq!(session.registry().open_handles(scope).unwrap(), 0);
        assert_eq!(reader.next_row().unwrap(), None);
    }

    #[test]
    fn test_invalid_hudi_options() {
        let session = ScanSession::new(FileIO::new_with_memory());
        let options = TableOptions::builder()
            .record_key_fields(vec!["id".to_string()])
            .precombine_field("missing")
            .build();
        let result = ScanReader::builder(session, id_v_ts_schema(), TableFormat::Hudi)
            .with_table_options(options)
            .build(vec![]);
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::ConfigInvalid));
    }
}
