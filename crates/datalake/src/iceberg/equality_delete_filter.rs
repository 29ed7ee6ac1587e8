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

//! Drops rows matching the values of equality delete files.

use std::collections::HashSet;

use tracing::debug;

use crate::io::ScopedFileIO;
use crate::reader::{BoxedRowReader, FormatReaderFactory, ReadRequest, RowReader};
use crate::spec::{Datum, FileFragment, Projection, Record, SchemaRef};
use crate::{Error, ErrorKind, Result};

/// Deleted value tuples of one equality delete file, over that file's own
/// columns.
#[derive(Debug)]
pub struct EqualityDeleteSet {
    file_path: String,
    columns: Vec<usize>,
    keys: HashSet<Vec<Option<Datum>>>,
}

impl EqualityDeleteSet {
    /// Reads every row of `fragment`.
    pub fn load(
        factory: &dyn FormatReaderFactory,
        io: &ScopedFileIO,
        schema: &SchemaRef,
        fragment: &FileFragment,
    ) -> Result<Self> {
        if fragment.equality_columns.is_empty() {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "Equality delete file declares no equality columns",
            )
            .with_context("file", fragment.file_path.clone()));
        }
        let columns = schema.field_indices(fragment.equality_columns.as_slice())?;
        let request = ReadRequest::whole_file(
            schema.clone(),
            Projection::from_used((0..schema.len()).map(|i| columns.contains(&i)).collect()),
        );

        let mut reader = factory.open_file(io, &fragment.file_path, fragment.format, &request)?;
        let mut keys = HashSet::new();
        let loaded = (|| -> Result<()> {
            while let Some(row) = reader.next_row()? {
                // Duplicates keep the first entry.
                keys.insert(row.project(&columns));
            }
            Ok(())
        })();
        let closed = reader.close();
        loaded.and(closed)?;

        Ok(Self {
            file_path: fragment.file_path.clone(),
            columns,
            keys,
        })
    }

    /// Table column indices the set is keyed on.
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Number of distinct deleted tuples.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the file held no rows.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether the projection of `record` onto this set's columns was deleted.
    pub fn matches(&self, record: &Record) -> bool {
        self.keys.contains(&record.project(&self.columns))
    }
}

/// Filters rows through the equality delete sets of a task. A row is
/// dropped when any single set matches it.
pub struct EqualityDeleteFilter {
    inner: Option<BoxedRowReader>,
    sets: Vec<EqualityDeleteSet>,
    deleted: u64,
}

impl EqualityDeleteFilter {
    /// Loads one set per fragment. `inner` must read every equality column.
    pub fn try_new(
        inner: BoxedRowReader,
        factory: &dyn FormatReaderFactory,
        io: &ScopedFileIO,
        schema: &SchemaRef,
        deletes: &[FileFragment],
    ) -> Result<Self> {
        let sets = deletes
            .iter()
            .map(|fragment| EqualityDeleteSet::load(factory, io, schema, fragment))
            .collect::<Result<Vec<_>>>()?;
        for set in &sets {
            debug!(
                file = %set.file_path,
                columns = ?set.columns,
                keys = set.len(),
                "Loaded equality delete set"
            );
        }
        Ok(Self::from_sets(inner, sets))
    }

    /// Wraps `inner` with sets that are already loaded.
    pub fn from_sets(inner: BoxedRowReader, sets: Vec<EqualityDeleteSet>) -> Self {
        Self {
            inner: Some(inner),
            sets,
            deleted: 0,
        }
    }

    /// Columns that have to be read for the sets to be evaluated.
    pub fn required_columns(schema: &SchemaRef, deletes: &[FileFragment]) -> Result<Vec<usize>> {
        let mut columns = vec![];
        for fragment in deletes {
            for idx in schema.field_indices(fragment.equality_columns.as_slice())? {
                if !columns.contains(&idx) {
                    columns.push(idx);
                }
            }
        }
        Ok(columns)
    }
}

impl RowReader for EqualityDeleteFilter {
    fn next_row(&mut self) -> Result<Option<Record>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(None);
        };
        while let Some(row) = inner.next_row()? {
            if self.sets.iter().any(|set| set.matches(&row)) {
                self.deleted += 1;
                continue;
            }
            return Ok(Some(row));
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        self.sets.clear();
        match self.inner.take() {
            Some(mut inner) => {
                debug!(deleted = self.deleted, "Equality delete filter closed");
                inner.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for EqualityDeleteFilter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "Failed to close equality delete filter");
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::io::{FileIO, ScanSession};
    use crate::reader::{DefaultFormatReaderFactory, VecRowReader, collect_rows};
    use crate::test_utils::{id_v_ts_schema, long_column, opt_long_column, write_parquet};

    fn base() -> BoxedRowReader {
        Box::new(VecRowReader::new((1..=4).map(|id| {
            Record::from_values(vec![
                Some(Datum::Long(id)),
                Some(Datum::Long(id * 10)),
                Some(Datum::Long(id % 2)),
                None,
            ])
        })))
    }

    fn ids(rows: &[Record]) -> Vec<i64> {
        rows.iter()
            .filter_map(|r| match r.get(0) {
                Some(Datum::Long(id)) => Some(*id),
                _ => None,
            })
            .collect()
    }

    // Both cases drop id 1 through the first file and id 3 through the second.
    #[rstest]
    #[case::disjoint(vec!["id"], vec!["v", "ts"], vec![2, 4])]
    #[case::overlapping(vec!["id"], vec!["id", "v"], vec![2, 4])]
    fn test_any_set_drops_the_row(
        #[case] first: Vec<&str>,
        #[case] second: Vec<&str>,
        #[case] expected: Vec<i64>,
    ) {
        let session = ScanSession::new(FileIO::new_with_memory());
        let io = session.file_io();
        let column = |name: &str| match name {
            "id" => long_column(&[1, 3, 3]),
            "v" => long_column(&[10, 30, 30]),
            _ => opt_long_column(&[Some(0), Some(1), Some(1)]),
        };
        // The first file only keeps its first row.
        write_parquet(io, "memory:///eq1.parquet", vec![(first[0], long_column(&[1]))], None);
        write_parquet(
            io,
            "memory:///eq2.parquet",
            second.iter().map(|name| (*name, column(name))).collect(),
            None,
        );
        let deletes = vec![
            FileFragment::equality_deletes("memory:///eq1.parquet", 1, first),
            FileFragment::equality_deletes("memory:///eq2.parquet", 3, second),
        ];

        let scope = session.open_scope().unwrap();
        let schema = id_v_ts_schema();
        let mut filter = EqualityDeleteFilter::try_new(
            base(),
            &DefaultFormatReaderFactory,
            &scope.file_io(),
            &schema,
            &deletes,
        )
        .unwrap();
        assert_eq!(filter.sets[1].len(), 2);

        assert_eq!(ids(&collect_rows(&mut filter).unwrap()), expected);
        assert_eq!(session.registry().open_handles(scope.id()).unwrap(), 0);
    }

    #[test]
    fn test_null_matches_null() {
        let schema = id_v_ts_schema();
        let set = EqualityDeleteSet {
            file_path: "eq".to_string(),
            columns: vec![3],
            keys: HashSet::from([vec![None]]),
        };
        let mut filter = EqualityDeleteFilter::from_sets(base(), vec![set]);
        assert!(collect_rows(&mut filter).unwrap().is_empty());
        assert_eq!(
            EqualityDeleteFilter::required_columns(&schema, &[
                FileFragment::equality_deletes("a", 1, ["ts", "id"]),
                FileFragment::equality_deletes("b", 1, ["id"]),
            ])
            .unwrap(),
            vec![2, 0]
        );
    }
}
