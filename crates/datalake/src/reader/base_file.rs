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

use super::{BoxedRowReader, FormatReaderFactory, ReadRequest, RowReader};
use crate::io::ScopedFileIO;
use crate::spec::{Datum, FileFragment, Projection, Record};
use crate::Result;

/// Reads the rows of one base data file and stamps constant column values
/// (partition values parsed from the path) onto every row.
pub struct BaseFileReader {
    inner: Option<BoxedRowReader>,
    constants: Vec<(usize, Datum)>,
}

impl BaseFileReader {
    /// Opens the data file of a task.
    pub fn open(
        factory: &dyn FormatReaderFactory,
        io: &ScopedFileIO,
        data_file: &FileFragment,
        request: &ReadRequest,
    ) -> Result<Self> {
        debug!(
            file = %data_file.file_path,
            format = %data_file.format,
            start = request.start,
            length = request.length,
            "Opening base file"
        );
        let inner = factory.open_file(io, &data_file.file_path, data_file.format, request)?;
        Ok(Self::from_reader(inner))
    }

    /// Wraps an already opened decoder.
    pub fn from_reader(inner: BoxedRowReader) -> Self {
        Self {
            inner: Some(inner),
            constants: vec![],
        }
    }

    /// Sets values stamped onto every row, by column index.
    pub fn with_constants(mut self, constants: Vec<(usize, Datum)>) -> Self {
        self.constants = constants;
        self
    }
}

impl RowReader for BaseFileReader {
    fn next_row(&mut self) -> Result<Option<Record>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(None);
        };
        let Some(mut record) = inner.next_row()? else {
            return Ok(None);
        };
        for (idx, value) in &self.constants {
            record.set(*idx, Some(value.clone()));
        }
        Ok(Some(record))
    }

    fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(mut inner) => inner.close(),
            None => Ok(()),
        }
    }
}

impl Drop for BaseFileReader {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "Failed to close base file reader");
        }
    }
}

/// Final stage of a pipeline: nulls every column the caller did not ask for,
/// undoing columns that were only read for filtering.
pub struct ProjectedRowReader {
    inner: Option<BoxedRowReader>,
    projection: Projection,
}

impl ProjectedRowReader {
    /// Wraps `inner`, exposing only the columns used by `projection`.
    pub fn new(inner: BoxedRowReader, projection: Projection) -> Self {
        Self {
            inner: Some(inner),
            projection,
        }
    }
}

impl RowReader for ProjectedRowReader {
    fn next_row(&mut self) -> Result<Option<Record>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(None);
        };
        Ok(inner.next_row()?.map(|mut record| {
            self.projection.hide_unused(&mut record);
            record
        }))
    }

    fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(mut inner) => inner.close(),
            None => Ok(()),
        }
    }
}

impl Drop for ProjectedRowReader {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "Failed to close projected reader");
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::reader::{VecRowReader, collect_rows};

    #[test]
    fn test_constants_and_hidden_columns() {
        let rows = VecRowReader::new([
            Record::from_values(vec![Some(Datum::Long(1)), Some(Datum::Long(10)), None]),
            Record::from_values(vec![Some(Datum::Long(2)), Some(Datum::Long(20)), None]),
        ]);
        let base = BaseFileReader::from_reader(Box::new(rows))
            .with_constants(vec![(2, Datum::string("2024-01-01"))]);
        let mut reader =
            ProjectedRowReader::new(Box::new(base), Projection::from_used(vec![false, true, true]));

        let out = collect_rows(&mut reader).unwrap();
        assert_eq!(out[0].values(), &[
            None,
            Some(Datum::Long(10)),
            Some(Datum::string("2024-01-01"))
        ]);
        assert_eq!(out.len(), 2);
        reader.close().unwrap();
    }
}
