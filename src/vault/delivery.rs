//! Delivery adapters for the non-blocking read forms.
//!
//! Both adapters wrap the same read-and-decrypt primitive
//! (`Inner::load_and_open`) and run it on the vault's blocking pool.
//! They are plain `Stream`/`Future` implementations, so any executor
//! can drive them, including `futures::executor::block_on`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::stream::{FusedStream, Stream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Executor, Inner};
use crate::errors::{Result, VaultError};

/// Lazy, single-item stream over one secret.
///
/// Nothing happens until the first poll.  The stream then yields
/// exactly one item, `Ok(value)` or the failure (`NotFound`,
/// `AuthenticationFailed`, ...), and ends.  Cloning gives a fresh,
/// unstarted stream over the same name, which is how a consumer
/// restarts it.
pub struct SecretStream {
    key: String,
    inner: Arc<Inner>,
    executor: Arc<Executor>,
    state: StreamState,
}

enum StreamState {
    Idle,
    Reading(JoinHandle<Result<String>>),
    Done,
}

impl SecretStream {
    pub(super) fn new(key: String, inner: Arc<Inner>, executor: Arc<Executor>) -> Self {
        Self {
            key,
            inner,
            executor,
            state: StreamState::Idle,
        }
    }

    /// Name of the secret this stream reads.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Clone for SecretStream {
    fn clone(&self) -> Self {
        Self::new(
            self.key.clone(),
            Arc::clone(&self.inner),
            Arc::clone(&self.executor),
        )
    }
}

impl Stream for SecretStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                StreamState::Idle => {
                    let inner = Arc::clone(&this.inner);
                    let key = this.key.clone();
                    debug!(key = %this.key, "Stream subscribed, starting read");
                    let task = this
                        .executor
                        .handle()
                        .spawn_blocking(move || inner.load_and_open(&key));
                    this.state = StreamState::Reading(task);
                }
                StreamState::Reading(task) => {
                    let joined = ready!(Pin::new(task).poll(cx));
                    this.state = StreamState::Done;
                    let item = joined.unwrap_or_else(|e| Err(VaultError::TaskFailed(e.to_string())));
                    return Poll::Ready(Some(item));
                }
                StreamState::Done => return Poll::Ready(None),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.state {
            StreamState::Done => (0, Some(0)),
            _ => (1, Some(1)),
        }
    }
}

impl FusedStream for SecretStream {
    fn is_terminated(&self) -> bool {
        matches!(self.state, StreamState::Done)
    }
}

/// Handle to a read that is already running off the caller's thread.
///
/// Resolves to the decrypted value or the failure.  `cancel` (or simply
/// dropping the handle) suppresses delivery; a read that has already
/// started still runs to completion and its result is discarded.
#[must_use = "a SecretFuture does nothing useful unless awaited, waited on, or cancelled"]
pub struct SecretFuture {
    rx: oneshot::Receiver<Result<String>>,
    // Keeps an owned runtime alive until the result is delivered.
    _executor: Arc<Executor>,
}

impl SecretFuture {
    pub(super) fn spawn(key: String, inner: Arc<Inner>, executor: Arc<Executor>) -> Self {
        let (tx, rx) = oneshot::channel();

        executor.handle().spawn_blocking(move || {
            if tx.is_closed() {
                debug!(key = %key, "Read cancelled before it started");
                return;
            }
            let result = inner.load_and_open(&key);
            if tx.send(result).is_err() {
                debug!(key = %key, "Read finished after cancellation, result dropped");
            }
        });

        Self {
            rx,
            _executor: executor,
        }
    }

    /// Stop waiting for the result.
    pub fn cancel(mut self) {
        self.rx.close();
    }

    /// Block the current thread until the read resolves.
    ///
    /// For callers outside any async context.  Inside one, `.await` the
    /// future instead.
    pub fn wait(self) -> Result<String> {
        futures::executor::block_on(self)
    }
}

impl Future for SecretFuture {
    type Output = Result<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.rx).poll(cx)) {
            Ok(result) => Poll::Ready(result),
            Err(_) => Poll::Ready(Err(VaultError::TaskFailed(
                "read task ended without delivering a result".into(),
            ))),
        }
    }
}
