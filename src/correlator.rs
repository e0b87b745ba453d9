//! Request/response correlation for asynchronous feeds
//!
//! Every feed gets the next request index and a one-shot completion. The
//! engine answers by index, in whatever order it finishes.

use std::collections::{HashMap, HashSet};

use tokio::sync::oneshot;

use crate::engine::RequestIndex;
use crate::error::{ResampleError, Result};

/// Completion handed back to a waiting writer.
pub type Completion = oneshot::Receiver<Result<()>>;

/// Maps in-flight request indices to their completions.
#[derive(Debug, Default)]
pub struct Correlator {
    next_index: RequestIndex,
    pending: HashMap<RequestIndex, oneshot::Sender<Result<()>>>,
    /// Indices whose writers were released early; their late answers are absorbed.
    abandoned: HashSet<RequestIndex>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next index and its completion.
    pub fn register(&mut self) -> (RequestIndex, Completion) {
        let index = self.next_index;
        self.next_index += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(index, tx);
        (index, rx)
    }

    /// Fire and forget the completion for `index`.
    pub fn resolve(&mut self, index: RequestIndex) -> Result<()> {
        if let Some(tx) = self.pending.remove(&index) {
            // The writer may have stopped waiting; that is not an error here.
            let _ = tx.send(Ok(()));
            return Ok(());
        }
        if self.abandoned.remove(&index) {
            tracing::debug!(index, "late completion for abandoned request");
            return Ok(());
        }
        Err(ResampleError::Correlation { index })
    }

    /// Undo a registration whose feed never reached the engine.
    pub fn forget(&mut self, index: RequestIndex) {
        self.pending.remove(&index);
    }

    /// Release every pending writer with `reason`, remembering the indices so
    /// the engine's eventual answers are not treated as violations.
    pub fn abandon_all(&mut self, reason: &ResampleError) -> usize {
        let count = self.pending.len();
        for (index, tx) in self.pending.drain() {
            let _ = tx.send(Err(reason.replicate()));
            self.abandoned.insert(index);
        }
        count
    }

    /// Fail every pending writer with `error`. The engine is not expected to
    /// answer them any more.
    pub fn fail_all(&mut self, error: &ResampleError) -> usize {
        let count = self.pending.len();
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(error.replicate()));
        }
        self.abandoned.clear();
        count
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn next_index(&self) -> RequestIndex {
        self.next_index
    }
}
