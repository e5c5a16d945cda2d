//! Cursor continuations for streamed result sets.
//!
//! A partial batch arrives with a [`Continuation`]: a one-shot handle
//! that re-arms the same token with a CONTINUE frame. The [`Cursor`]
//! wrapper layers pull semantics on top for callers that just want the
//! next batch until the stream runs dry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::client::{ConnectionInner, QueryResponse};
use crate::error::{DriverError, DriverResult};
use crate::protocol::datum::Datum;

/// One-shot handle for fetching the next batch of a partial sequence.
///
/// The handle refuses reuse: each batch delivers at most one follow-up
/// request, and a second invocation is a programming error.
pub struct Continuation {
    pub(crate) token: u64,
    pub(crate) inner: Arc<ConnectionInner>,
    pub(crate) used: AtomicBool,
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("token", &self.token)
            .field("used", &self.used.load(Ordering::Relaxed))
            .finish()
    }
}

impl Continuation {
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Request the next batch on this token. Exactly one invocation is
    /// allowed; a second fails with [`DriverError::ContinuationMisuse`].
    pub async fn next_batch(&self) -> DriverResult<QueryResponse> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(DriverError::ContinuationMisuse);
        }
        self.inner.continue_query(self.token).await
    }

    /// Cancel the stream instead of continuing it. Consumes the handle's
    /// single shot.
    pub async fn stop(&self) -> DriverResult<()> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(DriverError::ContinuationMisuse);
        }
        self.inner.stop_query(self.token).await.map(|_| ())
    }
}

/// Pull-style view over a streamed result set.
pub struct Cursor {
    batch: Option<Vec<Datum>>,
    continuation: Option<Continuation>,
}

impl Cursor {
    pub(crate) fn new(batch: Vec<Datum>, continuation: Option<Continuation>) -> Self {
        Self {
            batch: Some(batch),
            continuation,
        }
    }

    /// Whether the server holds further batches for this cursor.
    pub fn has_more(&self) -> bool {
        self.continuation.is_some()
    }

    /// The next batch of documents, or `None` once the stream is
    /// exhausted.
    pub async fn next_batch(&mut self) -> DriverResult<Option<Vec<Datum>>> {
        if let Some(batch) = self.batch.take() {
            return Ok(Some(batch));
        }
        let Some(continuation) = self.continuation.take() else {
            return Ok(None);
        };
        match continuation.next_batch().await? {
            QueryResponse::Rows { docs, continuation } => {
                self.continuation = continuation;
                Ok(Some(docs))
            }
            QueryResponse::Value(Datum::Array(items)) => Ok(Some(items)),
            QueryResponse::Value(datum) => Ok(Some(vec![datum])),
            QueryResponse::Unknown { code } => Err(DriverError::Protocol(format!(
                "unexpected response type {code} to CONTINUE"
            ))),
        }
    }

    /// Ask the server to drop the cursor. The remaining local batch is
    /// discarded; the token is freed once the server acknowledges.
    pub async fn stop(&mut self) -> DriverResult<()> {
        self.batch = None;
        match self.continuation.take() {
            Some(continuation) => continuation.stop().await,
            None => Ok(()),
        }
    }
}
