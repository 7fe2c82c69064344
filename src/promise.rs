use crate::{
    chain::Downstream,
    done::Done,
    wait::{WaitValue, Wakers},
    Error,
};
use std::{
    fmt, mem,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};
use tracing::{debug, trace, warn};

type Continuation<T, U> = Box<dyn FnOnce(&T) -> U + Send>;

/// A promise of one `T`, with room for a single continuation whose result is
/// posted into the owned downstream node `N`.
///
/// `Promise<T>` (that is, `Promise<T, Done>`) is the valued terminal of a
/// chain: its continuation returns nothing, and the [`Done`] behind it
/// completes as soon as the value arrives.
///
/// # Examples
///
/// ```
/// use promise_chain::Promise;
/// use std::{sync::Arc, thread};
///
/// let promise: Arc<Promise<i32>> = Arc::default();
/// let waiter = {
///     let promise = promise.clone();
///     thread::spawn(move || promise.wait())
/// };
/// promise.post(12).unwrap();
/// assert_eq!(waiter.join().unwrap(), Ok(12));
/// ```
pub struct Promise<T, N: Downstream = Done> {
    inner: Mutex<Inner<T, N::Input>>,
    cond: Condvar,
    next: N,
}

struct Inner<T, U> {
    value: Option<T>,
    posted: bool,
    callback: Callback<T, U>,
    wakers: Wakers,
}

enum Callback<T, U> {
    Vacant,
    Registered(Continuation<T, U>),
    Fired,
}

impl<T, N: Downstream> Promise<T, N> {
    /// Builds this node and, transitively, every node downstream of it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks the calling thread until the value is posted, then moves it out.
    ///
    /// Only the first call gets the value; later calls return
    /// [`Error::Taken`]. Blocks forever if nothing is ever posted.
    pub fn wait(&self) -> Result<T, Error> {
        let inner = self.lock();
        if !inner.posted {
            trace!("parking until the promise is posted");
        }
        let mut inner = self
            .cond
            .wait_while(inner, |inner| !inner.posted)
            .unwrap_or_else(PoisonError::into_inner);
        inner.value.take().ok_or(Error::Taken)
    }

    /// Resolves to the same result [`Promise::wait`] would return.
    pub fn wait_async(&self) -> WaitValue<'_, T, N> {
        WaitValue::new(self)
    }

    /// Registers the continuation and returns the node that receives its
    /// result.
    ///
    /// If the value is already here the continuation runs right away, on the
    /// calling thread, before this returns. Only the first continuation is
    /// kept; later ones are dropped without running.
    ///
    /// The continuation is stored in the node and may run on the producer's
    /// thread, so it must be `Send + 'static` and cannot borrow locals. Share
    /// state through an `Arc`, or keep the chain inside `thread::scope` and
    /// read results back with `wait`:
    ///
    /// ```
    /// use promise_chain::Promise;
    /// use std::thread;
    ///
    /// let head = Promise::<i32, Promise<String>>::new();
    /// let copied = thread::scope(|s| {
    ///     let consumer = s.spawn(|| head.then(|x| x.to_string()).wait());
    ///     s.spawn(|| head.post(20).unwrap());
    ///     consumer.join().unwrap()
    /// });
    /// assert_eq!(copied.as_deref(), Ok("20"));
    /// ```
    pub fn then<F>(&self, callback: F) -> &N
    where
        F: FnOnce(&T) -> N::Input + Send + 'static,
    {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if !matches!(inner.callback, Callback::Vacant) {
            warn!("promise already has a continuation, dropping the new one");
            return &self.next;
        }
        let result = match inner.value {
            Some(ref value) => {
                debug!("value already posted, running continuation now");
                inner.callback = Callback::Fired;
                Some(callback(value))
            }
            None => {
                if inner.posted {
                    warn!("value was taken before the continuation was registered, it will never run");
                }
                inner.callback = Callback::Registered(Box::new(callback));
                None
            }
        };
        drop(guard);

        if let Some(result) = result {
            self.cascade(result);
        }
        &self.next
    }

    /// Stores the value, wakes every waiter, and runs the continuation if one
    /// is already registered.
    ///
    /// A node takes exactly one value: posting again returns
    /// [`Error::AlreadyPosted`] and leaves the node and its chain untouched.
    pub fn post(&self, value: T) -> Result<(), Error> {
        let mut guard = self.lock();
        if guard.posted {
            warn!("promise was already posted, dropping the new value");
            return Err(Error::AlreadyPosted);
        }
        let inner = &mut *guard;
        inner.posted = true;
        let value: &T = inner.value.insert(value);
        self.cond.notify_all();
        inner.wakers.wake_all();
        let result = match mem::replace(&mut inner.callback, Callback::Fired) {
            Callback::Registered(callback) => {
                debug!("continuation already registered, running it now");
                Some(callback(value))
            }
            state => {
                inner.callback = state;
                N::eager_input()
            }
        };
        drop(guard);

        if let Some(result) = result {
            self.cascade(result);
        }
        Ok(())
    }

    /// Whether [`Promise::wait`] would return without blocking.
    pub fn is_posted(&self) -> bool {
        self.lock().posted
    }

    pub(crate) fn poll_wait(
        &self,
        key: &mut Option<u64>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<T, Error>> {
        let mut inner = self.lock();
        if inner.posted {
            return Poll::Ready(inner.value.take().ok_or(Error::Taken));
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

    // Runs without this node's lock held, so only the downstream lock is taken.
    fn cascade(&self, value: N::Input) {
        trace!("cascading into the downstream node");
        if let Err(err) = self.next.post(value) {
            warn!(%err, "downstream node rejected the cascaded value");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, N::Input>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, N: Downstream> Default for Promise<T, N> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                value: None,
                posted: false,
                callback: Callback::Vacant,
                wakers: Wakers::default(),
            }),
            cond: Condvar::new(),
            next: N::default(),
        }
    }
}

impl<T, N: Downstream> Downstream for Promise<T, N> {
    type Input = T;

    fn post(&self, value: T) -> Result<(), Error> {
        Promise::post(self, value)
    }
}

impl<T, N: Downstream + fmt::Debug> fmt::Debug for Promise<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Promise");
        match self.inner.try_lock() {
            Ok(inner) => {
                let continuation = match inner.callback {
                    Callback::Vacant => "vacant",
                    Callback::Registered(_) => "registered",
                    Callback::Fired => "fired",
                };
                d.field("posted", &inner.posted);
                d.field("continuation", &format_args!("{}", continuation));
            }
            Err(_) => {
                d.field("posted", &format_args!("<locked>"));
            }
        }
        d.field("next", &self.next).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Promise;
    use crate::Error;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    #[test]
    fn test_post_then_wait() {
        let promise = Promise::<i32>::new();
        assert!(!promise.is_posted());
        promise.post(12).unwrap();
        assert!(promise.is_posted());
        assert_eq!(promise.wait(), Ok(12));
    }

    #[test]
    fn test_wait_twice() {
        let promise = Promise::<String>::new();
        promise.post("🍓".into()).unwrap();
        assert_eq!(promise.wait().as_deref(), Ok("🍓"));
        assert_eq!(promise.wait(), Err(Error::Taken));
    }

    #[test]
    fn test_post_twice() {
        let promise = Promise::<i32, Promise<i32>>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let next = {
            let calls = calls.clone();
            promise.then(move |x| {
                calls.fetch_add(1, Ordering::SeqCst);
                x + 1
            })
        };
        promise.post(1).unwrap();
        assert_eq!(promise.post(2), Err(Error::AlreadyPosted));
        assert_eq!(promise.wait(), Ok(1));
        assert_eq!(next.wait(), Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_then_after_post_runs_inline() {
        let promise = Promise::<i32, Promise<i32>>::new();
        promise.post(3).unwrap();
        let next = promise.then(|x| x * 7);
        assert!(next.is_posted());
        assert_eq!(next.wait(), Ok(21));
        // The value stays in the node for its own waiter.
        assert_eq!(promise.wait(), Ok(3));
    }

    #[test]
    fn test_second_continuation_is_dropped() {
        let promise = Promise::<i32, Promise<i32>>::new();
        promise.then(|x| x + 1);
        promise.then(|x| x + 100);
        promise.post(1).unwrap();
        assert_eq!(promise.then(|x| x + 1000).wait(), Ok(2));
    }

    #[test]
    fn test_then_after_value_taken_never_cascades() {
        let promise = Promise::<i32, Promise<i32>>::new();
        promise.post(5).unwrap();
        assert_eq!(promise.wait(), Ok(5));
        let next = promise.then(|x| x + 1);
        assert!(!next.is_posted());
    }

    #[test]
    fn test_cascade_into_posted_downstream() {
        let promise = Promise::<i32, Promise<i32>>::new();
        let next = promise.then(|x| x + 1);
        next.post(40).unwrap();
        promise.post(1).unwrap();
        assert_eq!(next.wait(), Ok(40));
    }

    #[test]
    fn test_terminal_completes_without_continuation() {
        let promise = Promise::<i32>::new();
        promise.post(9).unwrap();
        let done = promise.then(|_| ());
        assert!(done.is_posted());
        done.wait();
    }

    #[test]
    fn test_terminal_runs_registered_continuation() {
        let promise = Arc::new(Promise::<i32>::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let done = {
            let seen = seen.clone();
            promise.then(move |x| seen.store(*x as usize, Ordering::SeqCst))
        };
        assert!(!done.is_posted());
        let producer = {
            let promise = promise.clone();
            thread::spawn(move || promise.post(17).unwrap())
        };
        done.wait();
        producer.join().expect("The producer thread has panicked");
        assert_eq!(seen.load(Ordering::SeqCst), 17);
    }

    #[test]
    fn test_continuation_panic_does_not_poison() {
        let promise = Arc::new(Promise::<i32, Promise<i32>>::new());
        promise.then(|_| panic!("continuation failed"));
        let producer = {
            let promise = promise.clone();
            thread::spawn(move || promise.post(1))
        };
        assert!(producer.join().is_err());
        assert!(promise.is_posted());
        assert_eq!(promise.wait(), Ok(1));
    }

    #[test]
    fn test_debug() {
        let promise = Promise::<i32>::new();
        assert_eq!(
            format!("{:?}", promise),
            "Promise { posted: false, continuation: vacant, next: Done { done: false } }"
        );
        promise.then(|_| ());
        promise.post(1).unwrap();
        assert_eq!(
            format!("{:?}", promise),
            "Promise { posted: true, continuation: fired, next: Done { done: true } }"
        );
    }

    #[test]
    fn test_post_wakes_every_blocked_waiter() {
        let promise = Arc::new(Promise::<i32>::new());
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let promise = promise.clone();
                thread::spawn(move || promise.wait())
            })
            .collect();
        thread::sleep(Duration::from_millis(100));
        promise.post(12).unwrap();
        let mut results: Vec<_> = waiters
            .into_iter()
            .map(|waiter| waiter.join().expect("The waiter thread has panicked"))
            .collect();
        results.sort_by_key(|result| result.is_err());
        assert_eq!(results, vec![Ok(12), Err(Error::Taken)]);
    }
}
