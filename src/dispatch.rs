// SPDX-License-Identifier: MIT

//! Concurrent, ordered hand-off of file streams to storage
//!
//! Every accepted file gets its own scoped store worker. The decoder feeds the
//! worker through a bounded channel of body chunks and moves on to the next
//! part as soon as the body is fully sent, so stores overlap with decoding.
//! Results are always collected in dispatch order, independent of the order
//! in which the workers finish. Each worker also stamps the moment its file
//! was created, so a rollback can remove files in creation order.

use crate::error::{CleanupError, LimitCode, StorageError};
use crate::storage::{FileInfo, StorageEngine, UploadedFile};
use log::{debug, error, warn};
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::{self, Scope, ScopedJoinHandle};

/// Chunks buffered between the decoder and one store worker
const CHANNEL_CAPACITY: usize = 4;

enum Chunk {
    Data(Vec<u8>),
    /// The file exceeded its size ceiling
    Truncated,
    /// The request was aborted mid-file
    Aborted,
}

/// `Read` side of a store worker's channel.
struct ChannelReader {
    rx: Receiver<Chunk>,
    current: Vec<u8>,
    pos: usize,
    failure: Option<(io::ErrorKind, &'static str)>,
}

impl ChannelReader {
    fn new(rx: Receiver<Chunk>) -> Self {
        Self {
            rx,
            current: Vec::new(),
            pos: 0,
            failure: None,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some((kind, message)) = self.failure {
                return Err(io::Error::new(kind, message));
            }

            if self.pos < self.current.len() {
                let n = buf.len().min(self.current.len() - self.pos);
                buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }

            match self.rx.recv() {
                Ok(Chunk::Data(data)) => {
                    self.current = data;
                    self.pos = 0;
                }
                Ok(Chunk::Truncated) => {
                    self.failure = Some((io::ErrorKind::FileTooLarge, LimitCode::FileSize.message()));
                }
                Ok(Chunk::Aborted) => {
                    self.failure = Some((io::ErrorKind::ConnectionAborted, "upload aborted"));
                }
                // Sender dropped after the last chunk
                Err(_) => return Ok(0),
            }
        }
    }
}

/// Decoder side of a store worker's channel.
pub(crate) struct FileSink {
    tx: SyncSender<Chunk>,
    connected: bool,
}

impl FileSink {
    /// Forward body bytes. Returns false once the worker stopped reading.
    pub(crate) fn send(&mut self, bytes: &[u8]) -> bool {
        if self.connected && self.tx.send(Chunk::Data(bytes.to_vec())).is_err() {
            self.connected = false;
        }
        self.connected
    }

    /// Fail the worker's stream because the file went over its size ceiling.
    pub(crate) fn truncate(self) {
        let _ = self.tx.send(Chunk::Truncated);
    }

    /// Fail the worker's stream because the request is being aborted.
    pub(crate) fn abort(self) {
        let _ = self.tx.send(Chunk::Aborted);
    }

    /// End the file normally.
    pub(crate) fn finish(self) {}
}

type StoreResult = Result<UploadedFile, StorageError>;

/// Completion stamp of a worker whose result never arrived
const NEVER_COMPLETED: usize = usize::MAX;

enum StoreState<'scope> {
    Running(ScopedJoinHandle<'scope, (usize, StoreResult)>),
    Joining,
    Done(usize, StoreResult),
}

struct PendingStore<'scope> {
    field: String,
    state: StoreState<'scope>,
}

impl PendingStore<'_> {
    fn into_outcome(self) -> StoreOutcome {
        let (completed, result) = match self.state {
            StoreState::Done(completed, result) => (completed, result),
            StoreState::Running(handle) => join_store(handle),
            StoreState::Joining => (
                NEVER_COMPLETED,
                Err(StorageError::new("STORE_LOST", "store worker result was lost")),
            ),
        };
        StoreOutcome {
            field: self.field,
            completed,
            result,
        }
    }
}

fn join_store(handle: ScopedJoinHandle<'_, (usize, StoreResult)>) -> (usize, StoreResult) {
    handle.join().unwrap_or_else(|_| {
        (
            NEVER_COMPLETED,
            Err(StorageError::new("STORE_PANICKED", "store worker panicked")),
        )
    })
}

/// Join a running worker in place.
fn settle(store: &mut PendingStore<'_>) {
    if !matches!(store.state, StoreState::Running(_)) {
        return;
    }
    if let StoreState::Running(handle) = std::mem::replace(&mut store.state, StoreState::Joining) {
        let (completed, result) = join_store(handle);
        store.state = StoreState::Done(completed, result);
    }
}

/// Final state of one store worker.
#[derive(Debug)]
pub(crate) struct StoreOutcome {
    pub(crate) field: String,
    /// Position among the request's finished workers
    pub(crate) completed: usize,
    pub(crate) result: StoreResult,
}

/// Finished stores of one request, in dispatch order.
pub(crate) type StoreResults = Vec<StoreOutcome>;

/// Spawns store workers within a thread scope and tracks them in order.
pub(crate) struct Dispatcher<'scope, 'env> {
    scope: &'scope Scope<'scope, 'env>,
    storage: &'env dyn StorageEngine,
    pending: Vec<PendingStore<'scope>>,
    completions: Arc<AtomicUsize>,
}

impl<'scope, 'env> Dispatcher<'scope, 'env> {
    pub(crate) fn new(scope: &'scope Scope<'scope, 'env>, storage: &'env dyn StorageEngine) -> Self {
        Self {
            scope,
            storage,
            pending: Vec::new(),
            completions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start a store for `info` and return the sink its body goes into.
    pub(crate) fn dispatch(&mut self, info: FileInfo) -> Result<FileSink, StorageError> {
        let (tx, rx) = sync_channel(CHANNEL_CAPACITY);
        let storage = self.storage;
        let field = info.field_name.clone();
        let index = self.pending.len();
        let completions = Arc::clone(&self.completions);

        let handle = thread::Builder::new()
            .name(format!("formdrop-store-{index}"))
            .spawn_scoped(self.scope, move || {
                let mut reader = ChannelReader::new(rx);
                let result = storage.store(&info, &mut reader);
                match &result {
                    Ok(file) => debug!(
                        "Stored '{}' for field '{}' ({} bytes)",
                        file.original_name, file.field_name, file.size
                    ),
                    Err(e) => debug!("Store for field '{}' failed: {e}", info.field_name),
                }
                (completions.fetch_add(1, Ordering::SeqCst), result)
            })
            .map_err(|e| StorageError::new("SPAWN_FAILED", e.to_string()))?;

        self.pending.push(PendingStore {
            field,
            state: StoreState::Running(handle),
        });
        Ok(FileSink {
            tx,
            connected: true,
        })
    }

    /// Collect finished workers and return the first failed store, if any.
    pub(crate) fn first_failure(&mut self) -> Option<usize> {
        for store in &mut self.pending {
            if matches!(&store.state, StoreState::Running(handle) if handle.is_finished()) {
                settle(store);
            }
        }

        self.pending
            .iter()
            .position(|store| matches!(store.state, StoreState::Done(_, Err(_))))
    }

    /// Wait for the most recently dispatched worker.
    pub(crate) fn settle_last(&mut self) {
        if let Some(store) = self.pending.last_mut() {
            settle(store);
        }
    }

    /// Wait for every worker, in dispatch order.
    pub(crate) fn join_all(self) -> StoreResults {
        self.pending
            .into_iter()
            .map(PendingStore::into_outcome)
            .collect()
    }
}

/// Remove every successfully stored file in the order the files were
/// created. Failed stores are returned in dispatch order so the caller can
/// pick the primary error.
pub(crate) fn rollback(
    storage: &dyn StorageEngine,
    results: StoreResults,
) -> (Vec<CleanupError>, Vec<(String, StorageError)>) {
    let mut created = Vec::new();
    let mut failures = Vec::new();

    for outcome in results {
        match outcome.result {
            Ok(file) => created.push((outcome.completed, outcome.field, file)),
            Err(e) => {
                if !is_expected_interrupt(&e) {
                    error!("Store for field '{}' failed: {e}", outcome.field);
                }
                failures.push((outcome.field, e));
            }
        }
    }

    // Stable, so equal stamps keep dispatch order
    created.sort_by_key(|(completed, _, _)| *completed);

    let mut cleanup_errors = Vec::new();
    for (_, field, file) in created {
        if let Err(error) = storage.remove(&file) {
            warn!("Failed to remove stored file for field '{field}': {error}");
            cleanup_errors.push(CleanupError { field, file, error });
        } else {
            debug!("Removed stored file for field '{field}'");
        }
    }

    (cleanup_errors, failures)
}

/// Stores that failed only because we cut their stream short.
fn is_expected_interrupt(err: &StorageError) -> bool {
    matches!(
        err.io_error().map(io::Error::kind),
        Some(io::ErrorKind::FileTooLarge | io::ErrorKind::ConnectionAborted)
    ) && matches!(err, StorageError::Stream(_))
}
