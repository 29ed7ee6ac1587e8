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

use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;

use super::storage::Storage;
use super::{LocalFsStorage, MemoryStorage};
use crate::Result;

/// FileIO implementation, used to manipulate files in underlying storage.
///
/// Supported storages:
///
/// | Storage            | Expected Path Format                         |
/// |--------------------|----------------------------------------------|
/// | Local file system  | `file:///path/to/file` or `/path/to/file`    |
/// | Memory             | `memory://path/to/file`                      |
///
/// Other transports implement [`Storage`] and are passed to
/// [`FileIO::from_storage`].
#[derive(Clone, Debug)]
pub struct FileIO {
    storage: Arc<dyn Storage>,
}

impl FileIO {
    /// Create a new FileIO backed by in-memory storage.
    ///
    /// This is useful for testing scenarios where persistent storage is not needed.
    pub fn new_with_memory() -> Self {
        Self::from_storage(Arc::new(MemoryStorage::new()))
    }

    /// Create a new FileIO backed by local filesystem storage.
    pub fn new_with_fs() -> Self {
        Self::from_storage(Arc::new(LocalFsStorage::new()))
    }

    /// Create a new FileIO over a custom transport.
    pub fn from_storage(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Deletes file.
    pub fn delete(&self, path: impl AsRef<str>) -> Result<()> {
        self.storage.delete(path.as_ref())
    }

    /// Check file exists.
    pub fn exists(&self, path: impl AsRef<str>) -> Result<bool> {
        self.storage.exists(path.as_ref())
    }

    /// Creates input file.
    pub fn new_input(&self, path: impl AsRef<str>) -> Result<InputFile> {
        Ok(InputFile::new(
            self.storage.clone(),
            path.as_ref().to_string(),
        ))
    }

    /// Creates output file.
    pub fn new_output(&self, path: impl AsRef<str>) -> Result<OutputFile> {
        Ok(OutputFile::new(
            self.storage.clone(),
            path.as_ref().to_string(),
        ))
    }
}

/// The struct the represents the metadata of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    /// The size of the file.
    pub size: u64,
}

/// Trait for reading file.
pub trait FileRead: Send + Sync + 'static {
    /// Read file content with given range.
    fn read(&self, range: Range<u64>) -> Result<Bytes>;

    /// Release the underlying handle.
    ///
    /// Closing twice is a no-op; reading after close fails.
    fn close(&self) -> Result<()>;
}

/// Input file is used for reading from files.
#[derive(Debug)]
pub struct InputFile {
    storage: Arc<dyn Storage>,
    // Absolute path of file.
    path: String,
}

impl InputFile {
    /// Creates a new input file.
    pub fn new(storage: Arc<dyn Storage>, path: String) -> Self {
        Self { storage, path }
    }

    /// Absolute path to root uri.
    pub fn location(&self) -> &str {
        &self.path
    }

    /// Check if file exists.
    pub fn exists(&self) -> Result<bool> {
        self.storage.exists(&self.path)
    }

    /// Fetch and returns metadata of file.
    pub fn metadata(&self) -> Result<FileMetadata> {
        self.storage.metadata(&self.path)
    }

    /// Read and returns whole content of file.
    ///
    /// For continuous reading, use [`Self::reader`] instead.
    pub fn read(&self) -> Result<Bytes> {
        self.storage.read(&self.path)
    }

    /// Creates [`FileRead`] for continuous reading.
    pub fn reader(&self) -> Result<Box<dyn FileRead>> {
        self.storage.reader(&self.path)
    }
}

/// Output file is used for writing to files.
#[derive(Debug)]
pub struct OutputFile {
    storage: Arc<dyn Storage>,
    // Absolute path of file.
    path: String,
}

impl OutputFile {
    /// Creates a new output file.
    pub fn new(storage: Arc<dyn Storage>, path: String) -> Self {
        Self { storage, path }
    }

    /// Absolute path to root uri.
    pub fn location(&self) -> &str {
        &self.path
    }

    /// Write the whole content of the file, replacing any previous content.
    pub fn write(&self, bs: Bytes) -> Result<()> {
        self.storage.write(&self.path, bs)
    }

    /// Converts into [`InputFile`].
    pub fn to_input_file(self) -> InputFile {
        InputFile {
            storage: self.storage,
            path: self.path,
        }
    }
}
