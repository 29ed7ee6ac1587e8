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

use std::fmt::Debug;

use bytes::Bytes;

use super::{FileMetadata, FileRead};
use crate::Result;

/// Trait for storage operations.
///
/// This is the transport seam: remote filesystems plug in behind it. Every
/// call blocks until the operation completes.
pub trait Storage: Debug + Send + Sync {
    /// Check if a file exists at the given path
    fn exists(&self, path: &str) -> Result<bool>;

    /// Get metadata from an input path
    fn metadata(&self, path: &str) -> Result<FileMetadata>;

    /// Read bytes from a path
    fn read(&self, path: &str) -> Result<Bytes>;

    /// Get FileRead from a path
    fn reader(&self, path: &str) -> Result<Box<dyn FileRead>>;

    /// Write bytes to an output path
    fn write(&self, path: &str, bs: Bytes) -> Result<()>;

    /// Delete a file at the given path
    fn delete(&self, path: &str) -> Result<()>;
}
