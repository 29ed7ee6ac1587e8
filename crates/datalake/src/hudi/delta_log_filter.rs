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

use tracing::debug;

use super::merged_log_reader::MergedLogRecordReader;
use crate::reader::{BoxedRowReader, RowReader};
use crate::spec::{Datum, Record};
use crate::Result;

/// Merges a base file with the net effect of its delta logs.
///
/// Every base row looks up the log state by record key: deleted keys drop the
/// row, updated keys replace its values and untouched keys pass through.
/// Once the base file is exhausted the keys only present in the logs are
/// drained when `emit_log_only_rows` is set.
pub struct DeltaLogFilter {
    base: Option<BoxedRowReader>,
    log: Option<MergedLogRecordReader>,
    constants: Vec<(usize, Datum)>,
    emit_log_only_rows: bool,
    stats: FilterStats,
}

#[derive(Debug, Default)]
struct FilterStats {
    passed: usize,
    updated: usize,
    deleted: usize,
    log_only: usize,
}

impl DeltaLogFilter {
    /// Wraps `base` and `log`. `constants` are stamped onto rows taken from
    /// the logs, which don't carry partition values parsed from paths.
    pub fn new(
        base: BoxedRowReader,
        log: MergedLogRecordReader,
        constants: Vec<(usize, Datum)>,
        emit_log_only_rows: bool,
    ) -> Self {
        Self {
            base: Some(base),
            log: Some(log),
            constants,
            emit_log_only_rows,
            stats: FilterStats::default(),
        }
    }

    fn next_base_row(&mut self) -> Result<Option<Record>> {
        let (Some(base), Some(log)) = (self.base.as_mut(), self.log.as_mut()) else {
            return Ok(None);
        };
        while let Some(row) = base.next_row()? {
            match log.contains(&row)? {
                None => {
                    self.stats.passed += 1;
                    return Ok(Some(row));
                }
                Some(merged) if merged.deleted => self.stats.deleted += 1,
                Some(merged) => {
                    self.stats.updated += 1;
                    let mut record = merged.record;
                    if let Some(position) = row.position() {
                        record = record.with_position(position);
                    }
                    stamp(&self.constants, &mut record);
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }
}

fn stamp(constants: &[(usize, Datum)], record: &mut Record) {
    for (idx, value) in constants {
        record.set(*idx, Some(value.clone()));
    }
}

impl RowReader for DeltaLogFilter {
    fn next_row(&mut self) -> Result<Option<Record>> {
        if self.base.is_some() {
            if let Some(row) = self.next_base_row()? {
                return Ok(Some(row));
            }
            if let Some(mut base) = self.base.take() {
                base.close()?;
            }
            debug!(
                passed = self.stats.passed,
                updated = self.stats.updated,
                deleted = self.stats.deleted,
                "Base file merged with delta logs"
            );
        }
        if !self.emit_log_only_rows {
            return Ok(None);
        }
        let Some(log) = self.log.as_mut() else {
            return Ok(None);
        };
        match log.next_row()? {
            Some(mut record) => {
                self.stats.log_only += 1;
                stamp(&self.constants, &mut record);
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        let base = match self.base.take() {
            Some(mut base) => base.close(),
            None => Ok(()),
        };
        let log = match self.log.take() {
            Some(mut log) => log.close(),
            None => Ok(()),
        };
        base.and(log)
    }
}

impl Drop for DeltaLogFilter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "Failed to close delta log filter");
        }
    }
}
