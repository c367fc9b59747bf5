//! Debounced invocation helpers.
//!
//! [`Debouncer`] coalesces rapid calls to a plain callback. [`DebouncedRequest`]
//! does the same for async work and additionally aborts a superseded call even
//! after it has started, so its result is never observed.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{AbortHandle, Abortable, BoxFuture};
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

type Callback<A> = Arc<dyn Fn(A) + Send + Sync>;

/// Runs the callback only after `delay` has passed without another call.
/// Must be used from inside a tokio runtime.
pub struct Debouncer<A> {
    func: Callback<A>,
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl<A: Send + 'static> Debouncer<A> {
    pub fn new<F>(delay: Duration, func: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn call(&self, args: A) {
        let func = Arc::clone(&self.func);
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            func(args);
        });
        let Ok(mut guard) = self.pending.lock() else {
            handle.abort();
            return;
        };
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
    }

    /// Drops the pending call. Returns true if one was still waiting.
    pub fn cancel(&self) -> bool {
        let Ok(mut guard) = self.pending.lock() else {
            return false;
        };
        match guard.take() {
            Some(handle) => {
                let waiting = !handle.is_finished();
                handle.abort();
                waiting
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl<A> Drop for Debouncer<A> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.pending.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

type RequestFn<A, T, E> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

#[derive(Default)]
struct InFlight {
    seq: u64,
    handle: Option<AbortHandle>,
}

/// Forgets the abort handle of call `seq` when that call ends, including when
/// its future is dropped early. A newer call's handle is left in place.
struct ReleaseInFlight<'a> {
    inflight: &'a Mutex<InFlight>,
    seq: u64,
}

impl Drop for ReleaseInFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.inflight.lock() {
            if guard.seq == self.seq {
                guard.handle = None;
            }
        }
    }
}

/// Debounced async call whose superseded invocations resolve to `Ok(None)`.
pub struct DebouncedRequest<A, T, E> {
    func: RequestFn<A, T, E>,
    delay: Duration,
    inflight: Mutex<InFlight>,
}

impl<A, T, E> DebouncedRequest<A, T, E>
where
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new<F, Fut>(delay: Duration, func: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |args| func(args).boxed()),
            delay,
            inflight: Mutex::new(InFlight::default()),
        }
    }

    /// Waits out the delay, then runs the request unless a newer call arrives
    /// first. Cancellation is never reported as an error.
    pub async fn call(&self, args: A) -> Result<Option<T>, E> {
        let (handle, registration) = AbortHandle::new_pair();
        let seq = match self.inflight.lock() {
            Ok(mut guard) => {
                if let Some(previous) = guard.handle.replace(handle) {
                    previous.abort();
                }
                guard.seq += 1;
                guard.seq
            }
            Err(_) => 0,
        };
        let _release = ReleaseInFlight {
            inflight: &self.inflight,
            seq,
        };

        let func = Arc::clone(&self.func);
        let delay = self.delay;
        let work = Abortable::new(
            async move {
                sleep(delay).await;
                func(args).await
            },
            registration,
        );
        match work.await {
            Ok(result) => result.map(Some),
            Err(_aborted) => {
                debug!(seq, "debounced request superseded");
                Ok(None)
            }
        }
    }

    /// Aborts whatever call is waiting or running.
    pub fn cancel(&self) {
        if let Ok(mut guard) = self.inflight.lock() {
            if let Some(handle) = guard.handle.take() {
                handle.abort();
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inflight
            .lock()
            .map(|guard| guard.handle.is_some())
            .unwrap_or(false)
    }
}
