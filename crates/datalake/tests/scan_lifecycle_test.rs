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

//! Resource lifecycle of a scan: per-task scopes, failures and cancellation.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{TestTable, drain, long_column, table_schema};
use datalake_reader::ErrorKind;
use datalake_reader::io::{Cancellation, FileIO, ScanSession};
use datalake_reader::reader::RowReader;
use datalake_reader::scan::{FileScanTask, ScanReader, TableFormat};
use datalake_reader::spec::{DataFileFormat, FileFragment, Projection};
use pretty_assertions::assert_eq;

fn write_ids(table: &TestTable, relative: &str, ids: &[i64]) -> FileFragment {
    let (path, size) = table.write_parquet(
        relative,
        vec![("id", long_column(ids.iter().copied()))],
        Some(1),
    );
    FileFragment::data(path, DataFileFormat::Parquet, ids.len() as u64).with_file_size(size)
}

#[test]
fn test_each_task_releases_its_scope() {
    let table = TestTable::new();
    let schema = table_schema();
    let tasks = (0..3)
        .map(|i| {
            let data = write_ids(&table, &format!("data/{i}.parquet"), &[i, i + 10]);
            FileScanTask::new(Some(data), Projection::all(&schema))
        })
        .collect::<Vec<_>>();

    let mut reader = ScanReader::builder(table.session.clone(), schema, TableFormat::Iceberg)
        .build(tasks)
        .unwrap();
    let mut scopes = vec![];
    let mut ids = vec![];
    while let Some(row) = reader.next_row().unwrap() {
        let scope = reader.current_task().unwrap().scope_id;
        if scopes.last() != Some(&scope) {
            scopes.push(scope);
        }
        ids.push(row);
    }

    assert_eq!(ids.len(), 6);
    assert_eq!(scopes.len(), 3);
    assert_eq!(reader.tasks_completed(), 3);
    assert_eq!(reader.remaining_tasks(), 0);
    for scope in scopes {
        assert_eq!(table.session.registry().open_handles(scope).unwrap(), 0);
    }
}

#[test]
fn test_failed_task_does_not_stop_the_scan() {
    let table = TestTable::new();
    let schema = table_schema();
    let missing = FileFragment::data(
        table.path("data/missing.parquet"),
        DataFileFormat::Parquet,
        1,
    );
    let tasks = vec![
        FileScanTask::new(Some(write_ids(&table, "data/a.parquet", &[1])), Projection::all(&schema)),
        FileScanTask::new(Some(missing), Projection::all(&schema)),
        FileScanTask::new(Some(write_ids(&table, "data/b.parquet", &[2])), Projection::all(&schema)),
    ];

    let mut reader = ScanReader::builder(table.session.clone(), schema, TableFormat::Iceberg)
        .build(tasks)
        .unwrap();
    assert_eq!(drain(&mut reader).unwrap_err().kind(), ErrorKind::TransportFailed);
    assert_eq!(reader.tasks_completed(), 1);
    assert_eq!(drain(&mut reader).unwrap(), vec![(2, -1, -1)]);
}

#[test]
fn test_cancellation_closes_open_files() {
    // Step 1: a session whose cancellation flag is flipped mid-scan.
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    let mut table = TestTable::new();
    table.session = ScanSession::new(FileIO::new_with_fs())
        .with_cancellation(Cancellation::from_fn(move || flag.load(Ordering::SeqCst)));
    let schema = table_schema();
    let data = write_ids(&table, "data/c.parquet", &[1, 2, 3, 4, 5]);

    let mut reader = ScanReader::builder(table.session.clone(), schema.clone(), TableFormat::Iceberg)
        .build(vec![
            FileScanTask::new(Some(data), Projection::all(&schema)),
        ])
        .unwrap();
    assert!(reader.next_row().unwrap().is_some());
    let scope = reader.current_task().unwrap().scope_id;
    assert_eq!(table.session.registry().open_handles(scope).unwrap(), 1);

    // Step 2: the next pull observes the cancellation and unwinds.
    cancelled.store(true, Ordering::SeqCst);
    assert_eq!(
        reader.next_row().unwrap_err().kind(),
        ErrorKind::OperationCancelled
    );
    assert_eq!(table.session.registry().open_handles(scope).unwrap(), 0);
    assert!(reader.current_task().is_none());

    // Step 3: closing after cancellation is a no-op.
    reader.close().unwrap();
}
