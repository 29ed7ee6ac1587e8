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

use super::delta_log_filter::DeltaLogFilter;
use super::merge_provider::MergeKeys;
use super::merged_log_reader::MergedLogRecordReader;
use super::partition::partition_constants;
use super::timeline::InstantFilter;
use crate::io::ScopedFileIO;
use crate::reader::{
    BaseFileReader, BoxedRowReader, FormatReaderFactory, ProjectedRowReader, ReadRequest,
};
use crate::scan::{FileScanTask, TaskPlan, TaskReader};
use crate::spec::{DataContentType, FileFragment, ReaderProperties, SchemaRef, TableOptions};
use crate::{Error, ErrorKind, Result};

/// Builds merge-on-read pipelines for Hudi file groups.
#[derive(Debug)]
pub struct HudiTaskReader {
    schema: SchemaRef,
    options: TableOptions,
    keys: Option<MergeKeys>,
    target_instant: Option<String>,
    properties: ReaderProperties,
    factory: Arc<dyn FormatReaderFactory>,
}

impl HudiTaskReader {
    /// Validates the key configuration of the table.
    pub fn try_new(
        schema: SchemaRef,
        options: TableOptions,
        target_instant: Option<String>,
        properties: ReaderProperties,
        factory: Arc<dyn FormatReaderFactory>,
    ) -> Result<Self> {
        let keys = if options.has_record_key() {
            Some(MergeKeys::try_new(&schema, &options)?)
        } else {
            None
        };
        Ok(Self {
            schema,
            options,
            keys,
            target_instant,
            properties,
            factory,
        })
    }

    fn delta_logs(task: &FileScanTask) -> Result<Vec<FileFragment>> {
        if let Some(other) = task
            .deletes
            .iter()
            .find(|f| f.content != DataContentType::DeltaLog)
        {
            return Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("Hudi tasks can't apply {} files", other.content),
            )
            .with_context("file", other.file_path.clone()));
        }
        Ok(task.deletes.clone())
    }

    fn merged_log_reader(
        &self,
        io: &ScopedFileIO,
        keys: &MergeKeys,
        task: &FileScanTask,
        plan: &TaskPlan,
        logs: &[FileFragment],
    ) -> Result<MergedLogRecordReader> {
        let target = task.instant.as_deref().or(self.target_instant.as_deref());
        MergedLogRecordReader::builder(io.clone(), self.schema.clone(), keys.clone())
            .with_projection(plan.read_projection.clone())
            .with_instant_filter(InstantFilter::new(&self.options, target))
            .with_factory(self.factory.clone())
            .with_properties(self.properties.clone())
            .build(logs)
    }

    fn base_reader(
        &self,
        io: &ScopedFileIO,
        data_file: &FileFragment,
        task: &FileScanTask,
        plan: &TaskPlan,
    ) -> Result<BaseFileReader> {
        let request = ReadRequest::whole_file(self.schema.clone(), plan.read_projection.clone())
            .with_range(task.start, task.length);
        Ok(
            BaseFileReader::open(self.factory.as_ref(), io, data_file, &request)?
                .with_constants(plan.constants.clone()),
        )
    }
}

impl TaskReader for HudiTaskReader {
    fn plan(&self, task: &FileScanTask) -> Result<TaskPlan> {
        let logs = Self::delta_logs(task)?;
        let path = task
            .data_file_path()
            .or_else(|| logs.first().map(|f| f.file_path.as_str()));
        let constants = match path {
            Some(path) => {
                partition_constants(&self.schema, &self.options, &task.projection, path)?
            }
            None => vec![],
        };
        let read_projection = match &self.keys {
            Some(keys) if !logs.is_empty() => {
                task.projection.with_forced(&keys.required_columns())
            }
            _ => task.projection.clone(),
        };
        Ok(TaskPlan {
            constants,
            read_projection,
        })
    }

    fn open(
        &self,
        io: &ScopedFileIO,
        task: &FileScanTask,
        plan: &TaskPlan,
    ) -> Result<BoxedRowReader> {
        let logs = Self::delta_logs(task)?;
        let pipeline: BoxedRowReader = match (&task.data_file, &self.keys) {
            (None, None) => {
                return Err(Error::new(
                    ErrorKind::ConfigInvalid,
                    "Reading a file group without base file needs record key fields",
                ));
            }
            (None, Some(keys)) => {
                debug!(log_files = logs.len(), "Reading log-only file group");
                let log = self.merged_log_reader(io, keys, task, plan, &logs)?;
                Box::new(
                    BaseFileReader::from_reader(Box::new(log))
                        .with_constants(plan.constants.clone()),
                )
            }
            (Some(data_file), Some(keys)) if !logs.is_empty() => {
                debug!(
                    file = %data_file.file_path,
                    log_files = logs.len(),
                    "Merging base file with delta logs"
                );
                let log = self.merged_log_reader(io, keys, task, plan, &logs)?;
                let base = self.base_reader(io, data_file, task, plan)?;
                Box::new(DeltaLogFilter::new(
                    Box::new(base),
                    log,
                    plan.constants.clone(),
                    self.properties.emit_log_only_rows,
                ))
            }
            (Some(data_file), keys) => {
                if keys.is_none() && !logs.is_empty() {
                    debug!(
                        file = %data_file.file_path,
                        log_files = logs.len(),
                        "Table has no record key, reading base file only"
                    );
                }
                Box::new(self.base_reader(io, data_file, task, plan)?)
            }
        };
        Ok(Box::new(ProjectedRowReader::new(
            pipeline,
            task.projection.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hudi::data_block::avro_data_block;
    use crate::hudi::delete_block::{DELETE_BLOCK_VERSION_1, DeleteKey, delete_block};
    use crate::hudi::log_format::LogBlockWriter;
    use crate::io::{FileIO, ScanSession};
    use crate::reader::{DefaultFormatReaderFactory, collect_rows};
    use crate::spec::{Datum, DataFileFormat, Field, PrimitiveType, Projection, Record, Schema};
    use crate::test_utils::{long_column, opt_long_column, write_parquet};

    fn schema() -> SchemaRef {
        Arc::new(
            Schema::builder()
                .with_fields([
                    Field::required("id", PrimitiveType::Long),
                    Field::optional("v", PrimitiveType::Long),
                    Field::optional("ts", PrimitiveType::Long),
                    Field::optional("dt", PrimitiveType::String),
                ])
                .build()
                .unwrap(),
        )
    }

    fn options() -> TableOptions {
        TableOptions::builder()
            .record_key_fields(vec!["id".to_string()])
            .precombine_field("ts")
            .partition_fields(vec!["dt".to_string()])
            .is_partitioned(true)
            .extract_partition_from_path(true)
            .hive_style_partitioning(true)
            .completed_instants(BTreeSet::from(["001".to_string(), "002".to_string()]))
            .build()
    }

    fn reader(options: TableOptions, emit_log_only_rows: bool) -> HudiTaskReader {
        HudiTaskReader::try_new(
            schema(),
            options,
            None,
            ReaderProperties {
                emit_log_only_rows,
                ..Default::default()
            },
            Arc::new(DefaultFormatReaderFactory),
        )
        .unwrap()
    }

    fn row(id: i64, v: Option<i64>, ts: Option<i64>) -> Record {
        Record::from_values(vec![
            Some(Datum::Long(id)),
            v.map(Datum::Long),
            ts.map(Datum::Long),
            Some(Datum::string("2024-01-01")),
        ])
    }

    const BASE: &str = "memory:///t/dt=2024-01-01/f1_0-1-0_001.parquet";
    const LOG: &str = "memory:///t/dt=2024-01-01/.f1_001.log.1_0-1-0";

    struct Fixture {
        session: ScanSession,
        base: FileFragment,
        log: FileFragment,
    }

    impl Fixture {
        fn new() -> Self {
            let session = ScanSession::new(FileIO::new_with_memory());
            let io = session.file_io();
            let size = write_parquet(
                io,
                BASE,
                vec![
                    ("id", long_column(&[1, 2, 3, 4])),
                    ("v", opt_long_column(&[Some(10), Some(20), Some(30), Some(40)])),
                    ("ts", opt_long_column(&[Some(100); 4])),
                ],
                None,
            );

            let upserts = [
                row(2, Some(21), Some(200)),
                row(3, Some(31), Some(50)),
                row(9, Some(90), Some(1)),
            ];
            let deletes = [DeleteKey::new("4").with_partition_path("dt=2024-01-01")];
            let mut writer = LogBlockWriter::new();
            for block in [
                avro_data_block(&schema(), &upserts, "001").unwrap(),
                delete_block(&deletes, DELETE_BLOCK_VERSION_1, "002").unwrap(),
                // Not completed.
                avro_data_block(&schema(), &[row(1, Some(0), Some(999))], "003").unwrap(),
            ] {
                writer.append(&block).unwrap();
            }
            let bytes = writer.finish();
            let log = FileFragment::delta_log(LOG, bytes.len() as u64);
            io.new_output(LOG).unwrap().write(bytes).unwrap();

            Self {
                session,
                base: FileFragment::data(BASE, DataFileFormat::Parquet, 4).with_file_size(size),
                log,
            }
        }

        fn read(
            &self,
            reader: &HudiTaskReader,
            task: &FileScanTask,
        ) -> Result<Vec<Vec<Option<Datum>>>> {
            let scope = self.session.open_scope()?;
            let plan = reader.plan(task)?;
            let mut pipeline = reader.open(&scope.file_io(), task, &plan)?;
            let mut rows = collect_rows(pipeline.as_mut())?
                .into_iter()
                .map(Record::into_values)
                .collect::<Vec<_>>();
            assert_eq!(self.session.registry().open_handles(scope.id())?, 0);
            rows.sort();
            Ok(rows)
        }
    }

    fn values(id: i64, v: Option<i64>, ts: Option<i64>) -> Vec<Option<Datum>> {
        row(id, v, ts).into_values()
    }

    #[test]
    fn test_base_file_merged_with_logs() {
        let fixture = Fixture::new();
        let task = FileScanTask::new(Some(fixture.base.clone()), Projection::all(&schema()))
            .with_deletes(vec![fixture.log.clone()]);

        let rows = fixture.read(&reader(options(), true), &task).unwrap();
        assert_eq!(rows, vec![
            values(1, Some(10), Some(100)),
            values(2, Some(21), Some(200)),
            values(3, Some(31), Some(50)),
            values(9, Some(90), Some(1)),
        ]);

        let rows = fixture.read(&reader(options(), false), &task).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_forced_key_columns_are_hidden() {
        let fixture = Fixture::new();
        let task = FileScanTask::new(
            Some(fixture.base.clone()),
            Projection::select(&schema(), &["v"]).unwrap(),
        )
        .with_deletes(vec![fixture.log.clone()]);

        let rows = fixture.read(&reader(options(), true), &task).unwrap();
        let v = rows.iter().map(|r| r[1].clone()).collect::<Vec<_>>();
        assert!(rows.iter().all(|r| r[0].is_none() && r[2].is_none() && r[3].is_none()));
        assert_eq!(v, [10, 21, 31, 90].map(|v| Some(Datum::Long(v))).to_vec());
    }

    #[test]
    fn test_log_only_file_group() {
        let fixture = Fixture::new();
        let task = FileScanTask::new(None, Projection::all(&schema()))
            .with_deletes(vec![fixture.log.clone()]);

        let rows = fixture.read(&reader(options(), true), &task).unwrap();
        assert_eq!(rows, vec![
            values(2, Some(21), Some(200)),
            values(3, Some(31), Some(50)),
            values(9, Some(90), Some(1)),
        ]);
    }

    #[test]
    fn test_without_record_key() {
        let fixture = Fixture::new();
        let mut options = options();
        options.record_key_fields.clear();
        let reader = reader(options, true);

        let task = FileScanTask::new(Some(fixture.base.clone()), Projection::all(&schema()))
            .with_deletes(vec![fixture.log.clone()]);
        let rows = fixture.read(&reader, &task).unwrap();
        assert_eq!(rows[3], values(4, Some(40), Some(100)));

        let task = FileScanTask::new(None, Projection::all(&schema()))
            .with_deletes(vec![fixture.log.clone()]);
        let err = fixture.read(&reader, &task).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_rejects_iceberg_deletes() {
        let fixture = Fixture::new();
        let task = FileScanTask::new(Some(fixture.base.clone()), Projection::all(&schema()))
            .with_deletes(vec![FileFragment::position_deletes("memory:///d.parquet", 1)]);
        let err = reader(options(), true).plan(&task).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FeatureUnsupported);
    }
}
