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

//! Task-scoped file handles and cancellation.
//!
//! A [`ScanSession`] owns one [`HandleRegistry`]. Every task opens a
//! [`ResourceScope`] from it, and every reader the task's pipeline opens goes
//! through that scope's [`ScopedFileIO`]. Releasing the scope force-closes
//! whatever the pipeline left open.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;

use super::{FileIO, FileMetadata, FileRead, InputFile};
use crate::{Error, ErrorKind, Result};

/// Polling hook consulted before every blocking read. Returns `true` once the
/// scan must stop.
pub type CancellationHook = Arc<dyn Fn() -> bool + Send + Sync>;

/// Cancellation state shared by every stage of a scan.
#[derive(Clone, Default)]
pub struct Cancellation {
    hook: Option<CancellationHook>,
}

impl Cancellation {
    /// A cancellation that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    /// Wraps a polling closure.
    pub fn from_fn(hook: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            hook: Some(Arc::new(hook)),
        }
    }

    /// Fails with [`ErrorKind::OperationCancelled`] when the hook fires.
    pub fn check(&self) -> Result<()> {
        match &self.hook {
            Some(hook) if hook() => Err(Error::new(
                ErrorKind::OperationCancelled,
                "Scan cancelled by caller",
            )),
            _ => Ok(()),
        }
    }
}

impl Debug for Cancellation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellation")
            .field("hook", &self.hook.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Identifier of one resource scope inside a [`HandleRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Raw id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Registry of open file handles keyed by the scope that opened them.
#[derive(Default)]
pub struct HandleRegistry {
    scopes: Mutex<HashMap<ScopeId, HashMap<u64, Arc<dyn FileRead>>>>,
    next_scope: AtomicU64,
    next_handle: AtomicU64,
}

impl HandleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ScopeId, HashMap<u64, Arc<dyn FileRead>>>>>
    {
        self.scopes.lock().map_err(|e| {
            Error::new(
                ErrorKind::Unexpected,
                format!("Handle registry lock poisoned: {e}"),
            )
        })
    }

    /// Allocates a fresh scope.
    pub fn open_scope(&self) -> Result<ScopeId> {
        let id = ScopeId(self.next_scope.fetch_add(1, Ordering::Relaxed));
        self.lock()?.insert(id, HashMap::new());
        Ok(id)
    }

    /// Registers a handle under `scope` and returns its handle id.
    pub fn register(&self, scope: ScopeId, handle: Arc<dyn FileRead>) -> Result<u64> {
        let mut scopes = self.lock()?;
        let handles = scopes.get_mut(&scope).ok_or_else(|| {
            Error::new(
                ErrorKind::Unexpected,
                format!("Scope {} has already been released", scope.0),
            )
        })?;
        let handle_id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        handles.insert(handle_id, handle);
        Ok(handle_id)
    }

    /// Removes a handle. Returns `false` if it is no longer registered, which
    /// means its scope already closed it.
    pub fn deregister(&self, scope: ScopeId, handle_id: u64) -> Result<bool> {
        Ok(self
            .lock()?
            .get_mut(&scope)
            .and_then(|handles| handles.remove(&handle_id))
            .is_some())
    }

    /// Number of handles still open under `scope`.
    pub fn open_handles(&self, scope: ScopeId) -> Result<usize> {
        Ok(self.lock()?.get(&scope).map(HashMap::len).unwrap_or(0))
    }

    /// Removes `scope` and force-closes every handle still registered under it.
    ///
    /// Returns how many handles were closed. Releasing a scope twice closes
    /// nothing the second time.
    pub fn release_scope(&self, scope: ScopeId) -> Result<usize> {
        let handles = self.lock()?.remove(&scope).unwrap_or_default();
        let count = handles.len();
        for (handle_id, handle) in handles {
            if let Err(err) = handle.close() {
                tracing::warn!(scope = scope.0, handle_id, %err, "Failed to force-close file handle");
            }
        }
        if count > 0 {
            tracing::debug!(scope = scope.0, count, "Force-closed file handles on scope release");
        }
        Ok(count)
    }
}

impl Debug for HandleRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("next_scope", &self.next_scope)
            .field("next_handle", &self.next_handle)
            .finish_non_exhaustive()
    }
}

/// File reader registered in a scope. Checks the cancellation hook before
/// every read and deregisters itself on close.
struct ScopedFileRead {
    inner: Arc<dyn FileRead>,
    scope: ScopeId,
    handle_id: u64,
    registry: Weak<HandleRegistry>,
    cancellation: Cancellation,
    closed: AtomicBool,
}

impl FileRead for ScopedFileRead {
    fn read(&self, range: Range<u64>) -> Result<Bytes> {
        self.cancellation.check()?;
        self.inner.read(range)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let owned = match self.registry.upgrade() {
            Some(registry) => registry.deregister(self.scope, self.handle_id)?,
            None => true,
        };
        if owned {
            self.inner.close()?;
        }
        Ok(())
    }
}

/// File access bound to one resource scope. Cheap to clone; every pipeline
/// stage of a task holds one.
#[derive(Clone, Debug)]
pub struct ScopedFileIO {
    scope: ScopeId,
    registry: Arc<HandleRegistry>,
    file_io: FileIO,
    cancellation: Cancellation,
}

impl ScopedFileIO {
    /// Scope this io belongs to.
    pub fn scope_id(&self) -> ScopeId {
        self.scope
    }

    /// Cancellation shared with the session.
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Creates an input file without opening it.
    pub fn new_input(&self, path: impl AsRef<str>) -> Result<InputFile> {
        self.file_io.new_input(path)
    }

    /// Fetches file metadata.
    pub fn metadata(&self, path: impl AsRef<str>) -> Result<FileMetadata> {
        self.cancellation.check()?;
        self.file_io.new_input(path)?.metadata()
    }

    /// Opens a reader registered in this scope.
    pub fn open(&self, path: impl AsRef<str>) -> Result<Arc<dyn FileRead>> {
        self.cancellation.check()?;
        let inner: Arc<dyn FileRead> = Arc::from(self.file_io.new_input(path)?.reader()?);
        let handle_id = self.registry.register(self.scope, inner.clone())?;
        Ok(Arc::new(ScopedFileRead {
            inner,
            scope: self.scope,
            handle_id,
            registry: Arc::downgrade(&self.registry),
            cancellation: self.cancellation.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    /// Reads a whole file through a scoped handle and closes it again.
    pub fn read_all(&self, path: impl AsRef<str>) -> Result<Bytes> {
        let path = path.as_ref();
        let size = self.metadata(path)?.size;
        let reader = self.open(path)?;
        let result = reader.read(0..size);
        reader.close()?;
        result
    }
}

/// Owns one scope of a [`HandleRegistry`]. Dropping it releases the scope.
#[derive(Debug)]
pub struct ResourceScope {
    io: ScopedFileIO,
    released: bool,
}

impl ResourceScope {
    /// Scope id.
    pub fn id(&self) -> ScopeId {
        self.io.scope
    }

    /// File access for pipeline stages of this scope.
    pub fn file_io(&self) -> ScopedFileIO {
        self.io.clone()
    }

    /// Force-closes every handle still open in this scope. Returns the number
    /// of handles closed; later calls return zero.
    pub fn release(&mut self) -> Result<usize> {
        if self.released {
            return Ok(0);
        }
        self.released = true;
        self.io.registry.release_scope(self.io.scope)
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(scope = self.io.scope.0, %err, "Failed to release resource scope");
        }
    }
}

/// Per-worker scan session: the transport, the handle registry and the
/// cancellation hook shared by all tasks of one worker.
#[derive(Debug, Clone)]
pub struct ScanSession {
    file_io: FileIO,
    registry: Arc<HandleRegistry>,
    cancellation: Cancellation,
}

impl ScanSession {
    /// Creates a session over `file_io` that is never cancelled.
    pub fn new(file_io: FileIO) -> Self {
        Self {
            file_io,
            registry: Arc::new(HandleRegistry::new()),
            cancellation: Cancellation::never(),
        }
    }

    /// Installs a cancellation hook.
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// The registry shared by every scope of this session.
    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    /// Underlying file io.
    pub fn file_io(&self) -> &FileIO {
        &self.file_io
    }

    /// Opens a new resource scope.
    pub fn open_scope(&self) -> Result<ResourceScope> {
        let scope = self.registry.open_scope()?;
        Ok(ResourceScope {
            io: ScopedFileIO {
                scope,
                registry: self.registry.clone(),
                file_io: self.file_io.clone(),
                cancellation: self.cancellation.clone(),
            },
            released: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct CountingRead {
        closes: Arc<AtomicUsize>,
    }

    impl FileRead for CountingRead {
        fn read(&self, _range: Range<u64>) -> Result<Bytes> {
            Ok(Bytes::new())
        }

        fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn session_with_file() -> ScanSession {
        let file_io = FileIO::new_with_memory();
        file_io
            .new_output("memory://t/a")
            .unwrap()
            .write(Bytes::from_static(b"abcdef"))
            .unwrap();
        ScanSession::new(file_io)
    }

    #[test]
    fn test_release_scope_closes_each_handle_once() {
        let registry = HandleRegistry::new();
        let scope = registry.open_scope().unwrap();
        let closes = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            registry
                .register(
                    scope,
                    Arc::new(CountingRead {
                        closes: closes.clone(),
                    }),
                )
                .unwrap();
        }

        assert_eq!(registry.open_handles(scope).unwrap(), 3);
        assert_eq!(registry.release_scope(scope).unwrap(), 3);
        assert_eq!(registry.release_scope(scope).unwrap(), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 3);
        assert!(registry.register(scope, Arc::new(CountingRead { closes })).is_err());
    }

    #[test]
    fn test_closed_handle_deregisters() {
        let session = session_with_file();
        let mut scope = session.open_scope().unwrap();
        let io = scope.file_io();

        let reader = io.open("memory://t/a").unwrap();
        assert_eq!(reader.read(1..3).unwrap(), Bytes::from_static(b"bc"));
        assert_eq!(session.registry().open_handles(scope.id()).unwrap(), 1);

        reader.close().unwrap();
        reader.close().unwrap();
        assert_eq!(session.registry().open_handles(scope.id()).unwrap(), 0);
        assert_eq!(scope.release().unwrap(), 0);
    }

    #[test]
    fn test_release_force_closes_leaked_reader() {
        let session = session_with_file();
        let mut scope = session.open_scope().unwrap();
        let reader = scope.file_io().open("memory://t/a").unwrap();

        assert_eq!(scope.release().unwrap(), 1);
        assert_eq!(
            reader.read(0..1).unwrap_err().kind(),
            ErrorKind::TransportFailed
        );
        // Closing after the scope already closed it must not double-release.
        reader.close().unwrap();
    }

    #[test]
    fn test_cancellation_fails_reads() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let session = session_with_file()
            .with_cancellation(Cancellation::from_fn(move || flag.load(Ordering::SeqCst)));
        let scope = session.open_scope().unwrap();
        let io = scope.file_io();

        assert_eq!(io.read_all("memory://t/a").unwrap().len(), 6);
        let reader = io.open("memory://t/a").unwrap();
        cancelled.store(true, Ordering::SeqCst);
        assert_eq!(
            reader.read(0..1).unwrap_err().kind(),
            ErrorKind::OperationCancelled
        );
        assert_eq!(
            io.open("memory://t/a").err().unwrap().kind(),
            ErrorKind::OperationCancelled
        );
    }
}
