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

//! End-to-end merge-on-read scans of Hudi file slices on local disk.

mod common;

use std::collections::BTreeSet;

use common::{TestTable, drain, record, table_schema};
use datalake_reader::ErrorKind;
use datalake_reader::hudi::{
    DELETE_BLOCK_VERSION_2, DeleteKey, InstantFilter, LogBlock, LogBlockReader, LogBlockType,
    MAGIC, MergeKeys, MergedLogRecordReader, avro_data_block, delete_block,
};
use datalake_reader::reader::RowReader;
use datalake_reader::scan::{FileScanTask, ScanReader, TableFormat};
use datalake_reader::spec::{Datum, Projection, ReaderProperties, TableOptions};
use pretty_assertions::assert_eq;
use rstest::rstest;

const COMMIT_1: &str = "20240101000000";
const COMMIT_2: &str = "20240102000000";

fn table_options(completed: &[&str]) -> TableOptions {
    TableOptions::builder()
        .record_key_fields(vec!["id".to_string()])
        .precombine_field("ts")
        .completed_instants(completed.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>())
        .build()
}

fn data_block(instant: &str, rows: &[(i64, i64, i64)]) -> LogBlock {
    let records = rows
        .iter()
        .map(|(id, v, ts)| record(*id, *v, *ts))
        .collect::<Vec<_>>();
    avro_data_block(&table_schema(), &records, instant).unwrap()
}

#[test]
fn test_log_record_overrides_base_row() {
    // Step 1: a base file with one row and a log updating it.
    let table = TestTable::new();
    let base = table.write_base_file("f1_0-1-0_001.parquet", &[(5, 1, 100), (6, 1, 100)]);
    let log = table.write_log(
        ".f1_001.log.1_0-1-0",
        &[data_block(COMMIT_1, &[(5, 2, 200)])],
        &[],
    );

    // Step 2: scan the file slice.
    let schema = table_schema();
    let task = FileScanTask::new(Some(base), Projection::all(&schema)).with_deletes(vec![log]);
    let mut reader = ScanReader::builder(table.session.clone(), schema, TableFormat::Hudi)
        .with_table_options(table_options(&[COMMIT_1]))
        .build(vec![task])
        .unwrap();

    // Step 3: the log values win, the untouched row passes through.
    assert_eq!(drain(&mut reader).unwrap(), vec![(5, 2, 200), (6, 1, 100)]);
    assert_eq!(reader.tasks_completed(), 1);
}

#[rstest]
#[case::hash_table(u64::MAX)]
#[case::ordered(0)]
fn test_log_only_slice_keeps_both_blocks_of_one_instant(#[case] hash_limit: u64) {
    let table = TestTable::new();
    let log = table.write_log(
        ".f2_001.log.1_0-1-0",
        &[
            data_block(COMMIT_1, &[(1, 10, 1)]),
            data_block(COMMIT_1, &[(2, 20, 1)]),
        ],
        &[],
    );

    let schema = table_schema();
    let task = FileScanTask::new(None, Projection::all(&schema)).with_deletes(vec![log]);
    let mut reader = ScanReader::builder(table.session.clone(), schema, TableFormat::Hudi)
        .with_table_options(table_options(&[COMMIT_1]))
        .with_properties(ReaderProperties {
            hash_table_max_log_bytes: hash_limit,
            spill_memtable_bytes: 64,
            ..Default::default()
        })
        .build(vec![task])
        .unwrap();

    let mut rows = drain(&mut reader).unwrap();
    rows.sort();
    assert_eq!(rows, vec![(1, 10, 1), (2, 20, 1)]);
}

#[test]
fn test_later_commit_deletes_base_row() {
    let table = TestTable::new();
    let base = table.write_base_file("f1_0-1-0_001.parquet", &[(1, 1, 1), (2, 2, 2)]);
    let deletes = delete_block(
        &[DeleteKey::new("1").with_ordering_value(Datum::Long(10))],
        DELETE_BLOCK_VERSION_2,
        COMMIT_2,
    )
    .unwrap();
    let log = table.write_log(
        ".f1_001.log.1_0-1-0",
        &[data_block(COMMIT_1, &[(2, 20, 5)]), deletes],
        &[],
    );

    let schema = table_schema();
    let task = FileScanTask::new(Some(base), Projection::all(&schema)).with_deletes(vec![log]);
    let mut reader = ScanReader::builder(table.session.clone(), schema, TableFormat::Hudi)
        .with_table_options(table_options(&[COMMIT_1, COMMIT_2]))
        .build(vec![task])
        .unwrap();

    assert_eq!(drain(&mut reader).unwrap(), vec![(2, 20, 5)]);
}

#[test]
fn test_time_travel_ignores_newer_commits() {
    let table = TestTable::new();
    let base = table.write_base_file("f1_0-1-0_001.parquet", &[(1, 1, 1)]);
    let log = table.write_log(
        ".f1_001.log.1_0-1-0",
        &[
            data_block(COMMIT_1, &[(1, 10, 10)]),
            data_block(COMMIT_2, &[(1, 20, 20)]),
        ],
        &[],
    );

    let schema = table_schema();
    let task = FileScanTask::new(Some(base), Projection::all(&schema)).with_deletes(vec![log]);
    let mut reader = ScanReader::builder(table.session.clone(), schema, TableFormat::Hudi)
        .with_table_options(table_options(&[COMMIT_1, COMMIT_2]))
        .with_target_instant(COMMIT_1)
        .build(vec![task])
        .unwrap();

    assert_eq!(drain(&mut reader).unwrap(), vec![(1, 10, 10)]);
}

#[test]
fn test_partition_values_come_from_path() {
    let table = TestTable::new();
    let base = table.write_base_file("dt=2024-03-01/f1_0-1-0_001.parquet", &[(1, 1, 1)]);
    let options = TableOptions::builder()
        .partition_fields(vec!["dt".to_string()])
        .is_partitioned(true)
        .extract_partition_from_path(true)
        .hive_style_partitioning(true)
        .build();

    let schema = table_schema();
    let task = FileScanTask::new(Some(base), Projection::all(&schema));
    let mut reader = ScanReader::builder(table.session.clone(), schema, TableFormat::Hudi)
        .with_table_options(options)
        .build(vec![task])
        .unwrap();

    let row = reader.next_row().unwrap().unwrap();
    assert_eq!(row.get(3), Some(&Datum::string("2024-03-01")));
    assert_eq!(reader.next_row().unwrap(), None);
}

#[test]
fn test_corrupted_tail_is_recovered() {
    // Step 1: a valid block followed by a torn write.
    let table = TestTable::new();
    let mut torn = MAGIC.to_vec();
    torn.extend_from_slice(&[0, 0, 0, 0, 0, 0, 1, 0, 0xde, 0xad]);
    let log = table.write_log(
        ".f3_001.log.1_0-1-0",
        &[data_block(COMMIT_1, &[(3, 30, 3)])],
        &torn,
    );

    // Step 2: the block reader reports the valid block, then the damage.
    let scope = table.session.open_scope().unwrap();
    let io = scope.file_io();
    let mut blocks = LogBlockReader::open(&io, &log.file_path, 64).unwrap();
    let first = blocks.next_block().unwrap().unwrap();
    assert_eq!(first.block_type(), LogBlockType::AvroData);
    let second = blocks.next_block().unwrap().unwrap();
    assert_eq!(second.block_type(), LogBlockType::Corrupted);
    assert_eq!(blocks.next_block().unwrap(), None);
    blocks.close().unwrap();

    // Step 3: the merged reader keeps the valid record.
    let schema = table_schema();
    let options = table_options(&[COMMIT_1]);
    let keys = MergeKeys::try_new(&schema, &options).unwrap();
    let mut merged = MergedLogRecordReader::builder(io, schema, keys)
        .with_instant_filter(InstantFilter::new(&options, None))
        .build(&[log])
        .unwrap();
    assert_eq!(drain(&mut merged).unwrap(), vec![(3, 30, 3)]);
    assert_eq!(merged.stats().corrupted_blocks, 1);
    merged.close().unwrap();
    assert_eq!(table.session.registry().open_handles(scope.id()).unwrap(), 0);
}

#[test]
fn test_missing_record_key_column_is_rejected() {
    let table = TestTable::new();
    let options = TableOptions::builder()
        .record_key_fields(vec!["uuid".to_string()])
        .build();
    let result = ScanReader::builder(table.session.clone(), table_schema(), TableFormat::Hudi)
        .with_table_options(options)
        .build(vec![]);
    assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::ConfigInvalid));
}
