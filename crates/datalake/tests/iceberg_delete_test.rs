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

//! End-to-end reads of Iceberg data files with position and equality deletes.

mod common;

use common::{TestTable, drain, long_column, string_column, table_schema};
use datalake_reader::ErrorKind;
use datalake_reader::scan::{FileScanTask, ScanReader, TableFormat};
use datalake_reader::spec::{FileFragment, Projection, ReaderProperties};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn write_data_file(table: &TestTable, relative: &str, rows: &[(i64, i64, i64)]) -> FileFragment {
    table.write_base_file(relative, rows)
}

fn write_position_deletes(
    table: &TestTable,
    relative: &str,
    data_file: &str,
    positions: &[i64],
) -> FileFragment {
    let (path, size) = table.write_parquet(
        relative,
        vec![
            ("file_path", string_column(positions.iter().map(|_| data_file))),
            ("pos", long_column(positions.iter().copied())),
        ],
        None,
    );
    FileFragment::position_deletes(path, positions.len() as u64).with_file_size(size)
}

fn write_equality_deletes(table: &TestTable, relative: &str, values: &[i64]) -> FileFragment {
    let (path, size) = table.write_parquet(
        relative,
        vec![("v", long_column(values.iter().copied()))],
        None,
    );
    FileFragment::equality_deletes(path, values.len() as u64, ["v"]).with_file_size(size)
}

fn scan(table: &TestTable, task: FileScanTask, threshold: u64) -> Vec<(i64, i64, i64)> {
    let mut reader =
        ScanReader::builder(table.session.clone(), table_schema(), TableFormat::Iceberg)
            .with_properties(ReaderProperties {
                position_delete_streaming_threshold: threshold,
                ..Default::default()
            })
            .build(vec![task])
            .unwrap();
    drain(&mut reader).unwrap()
}

#[test]
fn test_position_delete_removes_row() {
    // Step 1: three rows and a delete of the second one.
    let table = TestTable::new();
    let data = write_data_file(&table, "data/00000-0.parquet", &[
        (1, 10, 0),
        (2, 20, 0),
        (3, 30, 0),
    ]);
    let deletes = write_position_deletes(&table, "data/00000-0-deletes.parquet", &data.file_path, &[
        1,
    ]);

    // Step 2: scan with the delete attached.
    let schema = table_schema();
    let task = FileScanTask::new(Some(data), Projection::all(&schema)).with_deletes(vec![deletes]);

    // Step 3: the deleted row is gone.
    assert_eq!(scan(&table, task, u64::MAX), vec![(1, 10, 0), (3, 30, 0)]);
}

#[rstest]
#[case::in_memory(u64::MAX)]
#[case::streaming(0)]
fn test_position_delete_strategies_agree(#[case] threshold: u64) {
    let table = TestTable::new();
    let rows = (0..10).map(|i| (i, i * 10, 0)).collect::<Vec<_>>();
    let data = write_data_file(&table, "data/00001-0.parquet", &rows);
    let other_file = table.path("data/other.parquet");
    let deletes = vec![
        write_position_deletes(&table, "data/d1.parquet", &data.file_path, &[0, 4, 9]),
        write_position_deletes(&table, "data/d2.parquet", &data.file_path, &[1, 4]),
        write_position_deletes(&table, "data/d3.parquet", &other_file, &[2, 3]),
    ];

    let schema = table_schema();
    let task = FileScanTask::new(Some(data), Projection::all(&schema)).with_deletes(deletes);
    let ids = scan(&table, task, threshold)
        .into_iter()
        .map(|(id, _, _)| id)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![2, 3, 5, 6, 7, 8]);
}

#[rstest]
#[case::disjoint(&[20][..], &[40][..], vec![1, 3])]
#[case::overlapping(&[20, 40][..], &[40][..], vec![1, 3])]
#[case::unmatched(&[99][..], &[][..], vec![1, 2, 3, 4])]
fn test_equality_deletes(
    #[case] first: &[i64],
    #[case] second: &[i64],
    #[case] expected: Vec<i64>,
) {
    let table = TestTable::new();
    let data = write_data_file(&table, "data/00002-0.parquet", &[
        (1, 10, 0),
        (2, 20, 0),
        (3, 30, 0),
        (4, 40, 0),
    ]);
    let deletes = vec![
        write_equality_deletes(&table, "data/eq1.parquet", first),
        write_equality_deletes(&table, "data/eq2.parquet", second),
    ];

    // Only `id` is requested; the equality column is read and hidden.
    let schema = table_schema();
    let projection = Projection::select(&schema, &["id"]).unwrap();
    let task = FileScanTask::new(Some(data), projection).with_deletes(deletes);
    let rows = scan(&table, task, u64::MAX);

    assert_eq!(
        rows.iter().map(|(id, _, _)| *id).collect::<Vec<_>>(),
        expected
    );
    assert!(rows.iter().all(|(_, v, _)| *v == -1));
}

#[test]
fn test_position_and_equality_deletes_combine() {
    let table = TestTable::new();
    let data = write_data_file(&table, "data/00003-0.parquet", &[
        (1, 10, 0),
        (2, 20, 0),
        (3, 30, 0),
    ]);
    let deletes = vec![
        write_position_deletes(&table, "data/pos.parquet", &data.file_path, &[0]),
        write_equality_deletes(&table, "data/eq.parquet", &[30]),
    ];

    let schema = table_schema();
    let task = FileScanTask::new(Some(data), Projection::all(&schema)).with_deletes(deletes);
    assert_eq!(scan(&table, task, u64::MAX), vec![(2, 20, 0)]);
}

#[test]
fn test_delta_logs_are_rejected() {
    let table = TestTable::new();
    let data = write_data_file(&table, "data/00004-0.parquet", &[(1, 10, 0)]);
    let log = FileFragment::delta_log(table.path("data/.f1.log.1"), 0);
    let schema = table_schema();
    let task = FileScanTask::new(Some(data), Projection::all(&schema)).with_deletes(vec![log]);

    let mut reader =
        ScanReader::builder(table.session.clone(), schema, TableFormat::Iceberg)
            .build(vec![task])
            .unwrap();
    let err = drain(&mut reader).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FeatureUnsupported);
}
