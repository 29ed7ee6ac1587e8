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

use std::sync::Arc;

use tracing::debug;

use super::equality_delete_filter::EqualityDeleteFilter;
use super::position_delete_filter::PositionDeleteFilter;
use crate::io::ScopedFileIO;
use crate::reader::{
    BaseFileReader, BoxedRowReader, FormatReaderFactory, ProjectedRowReader, ReadRequest,
};
use crate::scan::{FileScanTask, TaskPlan, TaskReader};
use crate::spec::{DataContentType, ReaderProperties, SchemaRef};
use crate::{Error, ErrorKind, Result};

/// Builds base file → position deletes → equality deletes pipelines.
#[derive(Debug)]
pub struct IcebergTaskReader {
    schema: SchemaRef,
    properties: ReaderProperties,
    factory: Arc<dyn FormatReaderFactory>,
}

impl IcebergTaskReader {
    /// Creates a task reader for a table with `schema`.
    pub fn new(
        schema: SchemaRef,
        properties: ReaderProperties,
        factory: Arc<dyn FormatReaderFactory>,
    ) -> Self {
        Self {
            schema,
            properties,
            factory,
        }
    }
}

impl TaskReader for IcebergTaskReader {
    fn plan(&self, task: &FileScanTask) -> Result<TaskPlan> {
        if let Some(log) = task
            .deletes
            .iter()
            .find(|f| matches!(f.content, DataContentType::DeltaLog | DataContentType::Data))
        {
            return Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("Iceberg tasks can't apply {} files", log.content),
            )
            .with_context("file", log.file_path.clone()));
        }
        let equality_deletes = task.deletes_of(DataContentType::EqualityDeletes);
        let forced = EqualityDeleteFilter::required_columns(&self.schema, &equality_deletes)?;
        Ok(TaskPlan {
            constants: vec![],
            read_projection: task.projection.with_forced(&forced),
        })
    }

    fn open(
        &self,
        io: &ScopedFileIO,
        task: &FileScanTask,
        plan: &TaskPlan,
    ) -> Result<BoxedRowReader> {
        let data_file = task.data_file.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::DataInvalid, "Iceberg task has no data file")
        })?;
        let position_deletes = task.deletes_of(DataContentType::PositionDeletes);
        let equality_deletes = task.deletes_of(DataContentType::EqualityDeletes);
        debug!(
            file = %data_file.file_path,
            position_deletes = position_deletes.len(),
            equality_deletes = equality_deletes.len(),
            "Building iceberg task pipeline"
        );

        let request = ReadRequest::whole_file(self.schema.clone(), plan.read_projection.clone())
            .with_range(task.start, task.length);
        let mut pipeline: BoxedRowReader = Box::new(
            BaseFileReader::open(self.factory.as_ref(), io, data_file, &request)?
                .with_constants(plan.constants.clone()),
        );
        if !position_deletes.is_empty() {
            pipeline = Box::new(PositionDeleteFilter::try_new(
                pipeline,
                self.factory.as_ref(),
                io,
                &data_file.file_path,
                &position_deletes,
                self.properties.position_delete_streaming_threshold,
            )?);
        }
        if !equality_deletes.is_empty() {
            pipeline = Box::new(EqualityDeleteFilter::try_new(
                pipeline,
                self.factory.as_ref(),
                io,
                &self.schema,
                &equality_deletes,
            )?);
        }
        Ok(Box::new(ProjectedRowReader::new(
            pipeline,
            task.projection.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::io::{FileIO, ScanSession};
    use crate::reader::{DefaultFormatReaderFactory, collect_rows};
    use crate::spec::{DataFileFormat, Datum, FileFragment, Projection};
    use crate::test_utils::{
        id_v_ts_schema, long_column, opt_long_column, string_column, write_parquet,
    };

    const DATA: &str = "memory:///t/data/00000-0.parquet";

    fn setup(session: &ScanSession) -> Vec<FileFragment> {
        let io = session.file_io();
        write_parquet(
            io,
            DATA,
            vec![
                ("id", long_column(&[1, 2, 3, 4, 5])),
                ("v", opt_long_column(&[Some(10), Some(20), Some(30), Some(40), Some(50)])),
            ],
            Some(2),
        );
        write_parquet(
            io,
            "memory:///t/data/pos-del.parquet",
            vec![
                (
                    "file_path",
                    string_column(&[Some(DATA), Some("memory:///t/data/other.parquet")]),
                ),
                ("pos", long_column(&[1, 3])),
            ],
            None,
        );
        write_parquet(
            io,
            "memory:///t/data/eq-del.parquet",
            vec![("v", opt_long_column(&[Some(50)]))],
            None,
        );
        vec![
            FileFragment::data(DATA, DataFileFormat::Parquet, 5),
            FileFragment::position_deletes("memory:///t/data/pos-del.parquet", 2),
            FileFragment::equality_deletes("memory:///t/data/eq-del.parquet", 1, ["v"]),
        ]
    }

    fn reader() -> IcebergTaskReader {
        IcebergTaskReader::new(
            id_v_ts_schema(),
            ReaderProperties::default(),
            Arc::new(DefaultFormatReaderFactory),
        )
    }

    #[test]
    fn test_position_and_equality_deletes() {
        let session = ScanSession::new(FileIO::new_with_memory());
        let files = setup(&session);
        let schema = id_v_ts_schema();
        let projection = Projection::select(&schema, &["id"]).unwrap();
        let task =
            FileScanTask::new(Some(files[0].clone()), projection).with_deletes(files[1..].to_vec());

        let reader = reader();
        let plan = reader.plan(&task).unwrap();
        assert!(plan.read_projection.is_used(1));

        let mut scope = session.open_scope().unwrap();
        let mut pipeline = reader.open(&scope.file_io(), &task, &plan).unwrap();
        let rows = collect_rows(pipeline.as_mut()).unwrap();
        assert_eq!(
            rows.iter().map(|r| r.values().to_vec()).collect::<Vec<_>>(),
            vec![
                vec![Some(Datum::Long(1)), None, None, None],
                vec![Some(Datum::Long(3)), None, None, None],
                vec![Some(Datum::Long(4)), None, None, None],
            ]
        );
        assert_eq!(scope.release().unwrap(), 0);
    }

    #[test]
    fn test_rejects_delta_logs() {
        let schema = id_v_ts_schema();
        let task = FileScanTask::new(None, Projection::all(&schema))
            .with_deletes(vec![FileFragment::delta_log("memory:///.f.log.1", 1)]);
        let err = reader().plan(&task).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FeatureUnsupported);
    }
}
