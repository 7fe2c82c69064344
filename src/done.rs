use crate::{
    chain::Downstream,
    wait::{WaitDone, Wakers},
    Error,
};
use std::{
    fmt,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};
use tracing::trace;

/// The void terminal that ends every chain.
///
/// It carries no value, only the fact that the chain in front of it was
/// evaluated. Posting it more than once is harmless.
#[derive(Default)]
pub struct Done {
    inner: Mutex<Inner>,
    cond: Condvar,
}

#[derive(Default)]
struct Inner {
    done: bool,
    wakers: Wakers,
}

impl Done {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks the calling thread until the chain has completed.
    pub fn wait(&self) {
        let inner = self.lock();
        if !inner.done {
            trace!("parking until the chain completes");
        }
        let _inner = self
            .cond
            .wait_while(inner, |inner| !inner.done)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Resolves once the chain has completed.
    pub fn wait_async(&self) -> WaitDone<'_> {
        WaitDone::new(self)
    }

    /// Marks the chain as completed and wakes every waiter.
    pub fn post(&self) {
        let mut inner = self.lock();
        if inner.done {
            return;
        }
        trace!("chain completed");
        inner.done = true;
        self.cond.notify_all();
        inner.wakers.wake_all();
    }

    /// Whether [`Done::wait`] would return without blocking.
    pub fn is_posted(&self) -> bool {
        self.lock().done
    }

    pub(crate) fn poll_wait(&self, key: &mut Option<u64>, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.lock();
        if inner.done {
            return Poll::Ready(());
        }
        inner.wakers.register(key, cx.waker());
        Poll::Pending
    }

    pub(crate) fn forget_waker(&self, key: u64) {
        self.lock().wakers.remove(key);
    }

    #[cfg(test)]
    pub(crate) fn pending_wakers(&self) -> usize {
        self.lock().wakers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Downstream for Done {
    type Input = ();

    fn eager_input() -> Option<()> {
        Some(())
    }

    fn post(&self, _: ()) -> Result<(), Error> {
        Done::post(self);
        Ok(())
    }
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Done");
        match self.inner.try_lock() {
            Ok(inner) => {
                d.field("done", &inner.done);
            }
            Err(_) => {
                d.field("done", &format_args!("<locked>"));
            }
        }
        d.finish()
    }
}
