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

use std::fmt;

use serde_derive::{Deserialize, Serialize};

use crate::{Error, ErrorKind, Result};

/// Content kind of a physical file slice.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum DataContentType {
    /// Base data rows.
    Data,
    /// Iceberg position deletes: `(file_path, pos)` rows.
    PositionDeletes,
    /// Iceberg equality deletes: rows over the declared equality columns.
    EqualityDeletes,
    /// Hudi delta log made of framed log blocks.
    DeltaLog,
}

impl fmt::Display for DataContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataContentType::Data => write!(f, "data"),
            DataContentType::PositionDeletes => write!(f, "position-deletes"),
            DataContentType::EqualityDeletes => write!(f, "equality-deletes"),
            DataContentType::DeltaLog => write!(f, "delta-log"),
        }
    }
}

/// Physical encoding of a row file.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFileFormat {
    /// Apache Parquet.
    Parquet,
    /// Apache ORC.
    Orc,
    /// Apache Avro.
    Avro,
}

impl DataFileFormat {
    /// Guesses the format from a file name extension.
    pub fn from_path(path: &str) -> Result<Self> {
        let ext = path.rsplit('.').next().unwrap_or_default();
        match ext.to_ascii_lowercase().as_str() {
            "parquet" => Ok(DataFileFormat::Parquet),
            "orc" => Ok(DataFileFormat::Orc),
            "avro" => Ok(DataFileFormat::Avro),
            _ => Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("Can't infer file format of '{path}'"),
            )),
        }
    }
}

impl fmt::Display for DataFileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataFileFormat::Parquet => write!(f, "parquet"),
            DataFileFormat::Orc => write!(f, "orc"),
            DataFileFormat::Avro => write!(f, "avro"),
        }
    }
}

/// A physical file slice produced by the planner. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFragment {
    /// Absolute file path.
    pub file_path: String,
    /// What the file holds.
    pub content: DataContentType,
    /// Physical encoding; unused for delta logs.
    pub format: DataFileFormat,
    /// Declared byte length.
    pub file_size_in_bytes: u64,
    /// Declared record count.
    pub record_count: u64,
    /// Equality column names, only for equality deletes.
    #[serde(default)]
    pub equality_columns: Vec<String>,
}

impl FileFragment {
    /// A base data file.
    pub fn data(file_path: impl Into<String>, format: DataFileFormat, record_count: u64) -> Self {
        Self {
            file_path: file_path.into(),
            content: DataContentType::Data,
            format,
            file_size_in_bytes: 0,
            record_count,
            equality_columns: vec![],
        }
    }

    /// A Hudi delta log fragment.
    pub fn delta_log(file_path: impl Into<String>, file_size_in_bytes: u64) -> Self {
        Self {
            file_path: file_path.into(),
            content: DataContentType::DeltaLog,
            format: DataFileFormat::Avro,
            file_size_in_bytes,
            record_count: 0,
            equality_columns: vec![],
        }
    }

    /// An Iceberg position delete fragment.
    pub fn position_deletes(file_path: impl Into<String>, record_count: u64) -> Self {
        Self {
            file_path: file_path.into(),
            content: DataContentType::PositionDeletes,
            format: DataFileFormat::Parquet,
            file_size_in_bytes: 0,
            record_count,
            equality_columns: vec![],
        }
    }

    /// An Iceberg equality delete fragment over the given columns.
    pub fn equality_deletes(
        file_path: impl Into<String>,
        record_count: u64,
        equality_columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            content: DataContentType::EqualityDeletes,
            format: DataFileFormat::Parquet,
            file_size_in_bytes: 0,
            record_count,
            equality_columns: equality_columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Sets the declared byte length.
    pub fn with_file_size(mut self, file_size_in_bytes: u64) -> Self {
        self.file_size_in_bytes = file_size_in_bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            DataFileFormat::from_path("s3://b/t/part-0.PARQUET").unwrap(),
            DataFileFormat::Parquet
        );
        assert_eq!(
            DataFileFormat::from_path("/t/.f1_20240101.log.1")
                .unwrap_err()
                .kind(),
            ErrorKind::FeatureUnsupported
        );
    }
}
