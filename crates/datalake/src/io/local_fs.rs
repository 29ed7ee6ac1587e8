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

//! Storage over the local filesystem.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;

use super::{FileMetadata, FileRead, Storage};
use crate::{Error, ErrorKind, Result};

/// Storage over the local filesystem.
///
/// Accepts `file:///p`, `file:/p` and plain absolute paths. Writes create
/// missing parent directories.
#[derive(Debug, Clone, Default)]
pub struct LocalFsStorage;

fn transport_error(action: &str, path: &Path, err: std::io::Error) -> Error {
    Error::new(ErrorKind::TransportFailed, format!("Failed to {action}"))
        .with_context("file", path.display().to_string())
        .with_source(err)
}

impl LocalFsStorage {
    /// Creates the storage.
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn normalize_path(path: &str) -> PathBuf {
        match path
            .strip_prefix("file://")
            .or_else(|| path.strip_prefix("file:"))
        {
            Some(stripped) if stripped.starts_with('/') => PathBuf::from(stripped),
            Some(stripped) => PathBuf::from(format!("/{stripped}")),
            None => PathBuf::from(path),
        }
    }
}

impl Storage for LocalFsStorage {
    fn exists(&self, path: &str) -> Result<bool> {
        Ok(Self::normalize_path(path).exists())
    }

    fn metadata(&self, path: &str) -> Result<FileMetadata> {
        let path = Self::normalize_path(path);
        let size = fs::metadata(&path)
            .map_err(|e| transport_error("stat file", &path, e))?
            .len();
        Ok(FileMetadata { size })
    }

    fn read(&self, path: &str) -> Result<Bytes> {
        let path = Self::normalize_path(path);
        fs::read(&path)
            .map(Bytes::from)
            .map_err(|e| transport_error("read file", &path, e))
    }

    fn reader(&self, path: &str) -> Result<Box<dyn FileRead>> {
        let path = Self::normalize_path(path);
        let file = fs::File::open(&path).map_err(|e| transport_error("open file", &path, e))?;
        Ok(Box::new(LocalFsFileRead::new(file)))
    }

    fn write(&self, path: &str, bs: Bytes) -> Result<()> {
        let path = Self::normalize_path(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| transport_error("create directory", parent, e))?;
        }
        fs::write(&path, &bs).map_err(|e| transport_error("write file", &path, e))
    }

    fn delete(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        match fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(transport_error("delete file", &path, e))
            }
            _ => Ok(()),
        }
    }
}

/// Positioned reads over an open local file. Reads are serialized.
#[derive(Debug)]
pub struct LocalFsFileRead {
    file: Mutex<Option<fs::File>>,
}

impl LocalFsFileRead {
    /// Wraps an open file.
    pub fn new(file: fs::File) -> Self {
        Self {
            file: Mutex::new(Some(file)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<fs::File>>> {
        self.file.lock().map_err(|e| {
            Error::new(ErrorKind::Unexpected, format!("File handle lock poisoned: {e}"))
        })
    }
}

impl FileRead for LocalFsFileRead {
    fn read(&self, range: Range<u64>) -> Result<Bytes> {
        let mut guard = self.lock()?;
        let Some(file) = guard.as_mut() else {
            return Err(Error::new(
                ErrorKind::TransportFailed,
                "Read on a closed file handle",
            ));
        };
        if range.start > range.end {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Invalid range {range:?}"),
            ));
        }

        let mut buffer = vec![0u8; (range.end - range.start) as usize];
        file.seek(SeekFrom::Start(range.start))?;
        match file.read_exact(&mut buffer) {
            Ok(()) => Ok(Bytes::from(buffer)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Range {range:?} is out of bounds"),
            )
            .with_source(e)),
            Err(e) => Err(Error::new(ErrorKind::TransportFailed, "Failed to read from file")
                .with_source(e)),
        }
    }

    fn close(&self) -> Result<()> {
        self.lock()?.take();
        Ok(())
    }
}
