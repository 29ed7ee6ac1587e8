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

//! Storage backed by a process-local map.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;

use super::{FileMetadata, FileRead, Storage};
use crate::{Error, ErrorKind, Result};

/// Storage keeping whole files in a shared map. Used by tests and by
/// callers that hand the reader pre-fetched bytes.
///
/// Paths are normalized before lookup, so `memory://t/f`, `memory:/t/f`,
/// `/t/f` and `t/f` name the same file.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<RwLock<HashMap<String, Bytes>>>,
}

fn poisoned(err: impl std::fmt::Display) -> Error {
    Error::new(
        ErrorKind::Unexpected,
        format!("Memory storage lock poisoned: {err}"),
    )
}

impl MemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn normalize_path(path: &str) -> String {
        let path = path
            .strip_prefix("memory://")
            .or_else(|| path.strip_prefix("memory:/"))
            .unwrap_or(path);
        path.trim_start_matches('/').to_string()
    }

    fn files(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Bytes>>> {
        self.files.read().map_err(poisoned)
    }

    fn files_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Bytes>>> {
        self.files.write().map_err(poisoned)
    }

    fn get(&self, path: &str) -> Result<Bytes> {
        self.files()?
            .get(&Self::normalize_path(path))
            .cloned()
            .ok_or_else(|| {
                Error::new(ErrorKind::TransportFailed, "File not found").with_context("file", path)
            })
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.files()?.contains_key(&Self::normalize_path(path)))
    }

    fn metadata(&self, path: &str) -> Result<FileMetadata> {
        let size = self.get(path)?.len() as u64;
        Ok(FileMetadata { size })
    }

    fn read(&self, path: &str) -> Result<Bytes> {
        self.get(path)
    }

    fn reader(&self, path: &str) -> Result<Box<dyn FileRead>> {
        self.get(path)
            .map(|data| Box::new(MemoryFileRead::new(data)) as Box<dyn FileRead>)
    }

    fn write(&self, path: &str, bs: Bytes) -> Result<()> {
        self.files_mut()?.insert(Self::normalize_path(path), bs);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.files_mut()?.remove(&Self::normalize_path(path));
        Ok(())
    }
}

/// Handle over the bytes of one in-memory file.
#[derive(Debug)]
pub struct MemoryFileRead {
    data: Bytes,
    closed: AtomicBool,
}

impl MemoryFileRead {
    /// Wraps `data` in an open handle.
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            closed: AtomicBool::new(false),
        }
    }
}

impl FileRead for MemoryFileRead {
    fn read(&self, range: Range<u64>) -> Result<Bytes> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::new(
                ErrorKind::TransportFailed,
                "Read on a closed file handle",
            ));
        }
        let len = self.data.len() as u64;
        if range.start > range.end || range.end > len {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Range {range:?} is out of bounds for {len} bytes"),
            ));
        }
        Ok(self.data.slice(range.start as usize..range.end as usize))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(MemoryStorage::normalize_path("memory://a/b"), "a/b");
        assert_eq!(MemoryStorage::normalize_path("memory:/a/b"), "a/b");
        assert_eq!(MemoryStorage::normalize_path("/a/b"), "a/b");
    }

    #[test]
    fn test_write_read_range_and_close() {
        let storage = MemoryStorage::new();
        storage
            .write("memory://t/f", Bytes::from_static(b"hello world"))
            .unwrap();

        assert!(storage.exists("/t/f").unwrap());
        assert_eq!(storage.metadata("t/f").unwrap().size, 11);

        let reader = storage.reader("memory://t/f").unwrap();
        assert_eq!(reader.read(6..11).unwrap(), Bytes::from_static(b"world"));
        assert_eq!(reader.read(6..12).unwrap_err().kind(), ErrorKind::DataInvalid);

        reader.close().unwrap();
        reader.close().unwrap();
        assert_eq!(
            reader.read(0..1).unwrap_err().kind(),
            ErrorKind::TransportFailed
        );
    }

    #[test]
    fn test_missing_file() {
        let storage = MemoryStorage::new();
        assert_eq!(
            storage.reader("memory://nope").err().unwrap().kind(),
            ErrorKind::TransportFailed
        );
    }
}
