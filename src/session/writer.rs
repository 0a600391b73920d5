//! Detached persistence write-through.
//!
//! Local edits update the cache synchronously and hand the durable write
//! to this worker; readers see the edit before the write-through resolves,
//! and a write-through failure never rolls the edit back.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Sender, unbounded};

use crate::core::BoardId;
use crate::session::store::{BoardStore, PersistChange};

enum WriteJob {
    Persist {
        board: BoardId,
        changes: Vec<PersistChange>,
    },
    Shutdown,
}

/// Handle to the write-through worker for one session.
pub struct WriteThrough {
    tx: Sender<WriteJob>,
    join: Option<JoinHandle<()>>,
}

impl WriteThrough {
    pub fn spawn(store: Arc<dyn BoardStore>) -> Self {
        let (tx, rx) = unbounded();
        let join = thread::Builder::new()
            .name("easel-write-through".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    match job {
                        WriteJob::Persist { board, changes } => {
                            if let Err(err) = store.persist(&board, &changes) {
                                tracing::warn!(
                                    %board,
                                    transience = ?err.transience(),
                                    "write-through failed; cache keeps the optimistic edit: {err}"
                                );
                            }
                        }
                        WriteJob::Shutdown => break,
                    }
                }
            })
            .expect("spawn write-through worker");
        Self {
            tx,
            join: Some(join),
        }
    }

    /// Enqueue a persistence batch. Fire-and-forget: the caller never
    /// waits for confirmation.
    pub fn enqueue(&self, board: BoardId, changes: Vec<PersistChange>) {
        if changes.is_empty() {
            return;
        }
        if self.tx.send(WriteJob::Persist { board, changes }).is_err() {
            tracing::warn!(%board, "write-through worker gone; durable write dropped");
        }
    }

    /// Drain outstanding jobs and stop the worker.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(WriteJob::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for WriteThrough {
    fn drop(&mut self) {
        let _ = self.tx.send(WriteJob::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
