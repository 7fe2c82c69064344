//! Futures that resolve when a node is posted, for callers that would rather
//! `.await` than park a thread.
//!
//! Nothing here drives a chain; posting still cascades synchronously on the
//! producer's thread. These only replace [`Promise::wait`] and [`Done::wait`].
//!
//! # Examples
//!
//! ```
//! use promise_chain::Promise;
//! use futures::executor::block_on;
//! use std::{sync::Arc, thread};
//!
//! let promise: Arc<Promise<String>> = Arc::default();
//! let producer = {
//!     let promise = promise.clone();
//!     thread::spawn(move || promise.post("Hi".into()))
//! };
//! let value = block_on(promise.wait_async());
//! producer.join().expect("The producer thread has panicked").unwrap();
//! assert_eq!(value.unwrap(), "Hi");
//! ```
use crate::{chain::Downstream, Done, Error, Promise};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};

/// Wakers of the futures currently waiting on one node, keyed per future so a
/// dropped future takes its entry with it.
#[derive(Default)]
pub(crate) struct Wakers {
    next_key: u64,
    entries: Vec<(u64, Waker)>,
}

impl Wakers {
    /// Stores `waker` under `key`, handing out a fresh key on first use.
    pub(crate) fn register(&mut self, key: &mut Option<u64>, waker: &Waker) {
        if let Some(key) = *key {
            if let Some((_, slot)) = self.entries.iter_mut().find(|(k, _)| *k == key) {
                if !slot.will_wake(waker) {
                    *slot = waker.clone();
                }
                return;
            }
        }
        let fresh = self.next_key;
        self.next_key += 1;
        self.entries.push((fresh, waker.clone()));
        *key = Some(fresh);
    }

    pub(crate) fn remove(&mut self, key: u64) {
        self.entries.retain(|(k, _)| *k != key);
    }

    pub(crate) fn wake_all(&mut self) {
        for (_, waker) in self.entries.drain(..) {
            waker.wake()
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Returned by [`Promise::wait_async`].
pub struct WaitValue<'a, T, N: Downstream> {
    promise: &'a Promise<T, N>,
    key: Option<u64>,
}

impl<'a, T, N: Downstream> WaitValue<'a, T, N> {
    pub(crate) fn new(promise: &'a Promise<T, N>) -> Self {
        Self { promise, key: None }
    }
}

impl<T, N: Downstream> Future for WaitValue<'_, T, N> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.promise.poll_wait(&mut this.key, cx)
    }
}

impl<T, N: Downstream> Drop for WaitValue<'_, T, N> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.promise.forget_waker(key);
        }
    }
}

impl<T, N: Downstream> fmt::Debug for WaitValue<'_, T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitValue")
            .field("posted", &self.promise.is_posted())
            .finish()
    }
}

/// Returned by [`Done::wait_async`].
#[derive(Debug)]
pub struct WaitDone<'a> {
    done: &'a Done,
    key: Option<u64>,
}

impl<'a> WaitDone<'a> {
    pub(crate) fn new(done: &'a Done) -> Self {
        Self { done, key: None }
    }
}

impl Future for WaitDone<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        this.done.poll_wait(&mut this.key, cx)
    }
}

impl Drop for WaitDone<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.done.forget_waker(key);
        }
    }
}
