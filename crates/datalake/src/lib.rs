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

//! Merge-on-read row reader for Hudi and Iceberg tables.
//!
//! A query engine hands one worker an ordered list of [`scan::FileScanTask`]
//! and pulls reconciled rows out of a [`scan::ScanReader`]. Each task pairs a
//! base data file with the change files that apply to it: Hudi delta logs,
//! or Iceberg position and equality delete files.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use datalake_reader::io::{FileIO, ScanSession};
//! use datalake_reader::reader::RowReader;
//! use datalake_reader::scan::{ScanReader, TableFormat};
//! use datalake_reader::spec::{Field, PrimitiveType, Schema};
//! use datalake_reader::Result;
//!
//! fn main() -> Result<()> {
//!     let schema = Arc::new(
//!         Schema::builder()
//!             .with_fields([Field::required("id", PrimitiveType::Long)])
//!             .build()?,
//!     );
//!     let session = ScanSession::new(FileIO::new_with_memory());
//!     let mut reader = ScanReader::builder(session, schema, TableFormat::Iceberg).build(vec![])?;
//!     while let Some(row) = reader.next_row()? {
//!         println!("{row:?}");
//!     }
//!     reader.close()
//! }
//! ```

#![deny(missing_docs)]

mod error;
pub use error::{Error, ErrorKind, Result};

pub mod arena;
pub mod io;
pub mod spec;

pub mod reader;

pub mod hudi;
pub mod iceberg;
pub mod scan;

#[cfg(test)]
mod test_utils;
