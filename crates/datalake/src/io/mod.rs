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

//! File io implementation.
//!
//! All operations are synchronous and blocking: a reader pipeline runs on a
//! single worker and only suspends inside these calls.
//!
//! # How to build `FileIO`
//!
//! ```rust
//! use datalake_reader::io::FileIO;
//!
//! // Build a memory file io.
//! let file_io = FileIO::new_with_memory();
//! // Build a local fs file io.
//! let file_io = FileIO::new_with_fs();
//! ```
//!
//! # How to use `FileIO`
//!
//! - `exists`: Check if file exists.
//! - `delete`: Delete file.
//! - `new_input`: Create input file for reading.
//! - `new_output`: Create output file for writing.
//!
//! Readers opened by a pipeline go through a [`ResourceScope`] instead, so
//! that they are force-closed when the owning task ends.

mod file_io;
pub use file_io::*;

mod storage;
pub use storage::Storage;

mod local_fs;
pub use local_fs::LocalFsStorage;

mod memory;
pub use memory::MemoryStorage;

mod scope;
pub use scope::*;
