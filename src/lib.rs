//! A single-value promise whose continuations form a statically typed chain.
//!
//! A producer posts one value into the head of a chain. Every node may carry
//! one continuation that turns its value into the value of the next node, and
//! the whole chain is evaluated synchronously on whichever thread completes
//! the second half of a "continuation registered, value posted" pair.
//!
//! The chain's shape lives in its type. `Promise<i32, Promise<String>>` is a
//! promise of an `i32` whose continuation produces a `String`; the
//! [`chain!`] macro spells the same type as `chain!(i32, String)`. Every chain
//! ends in a [`Done`] node that only signals completion.
//!
//! # Examples
//!
//! ```
//! use promise_chain::{chain, Error};
//! use std::{sync::Arc, thread};
//!
//! let head: Arc<chain!(i32, i32, String)> = Arc::default();
//! let consumer = {
//!     let head = Arc::clone(&head);
//!     thread::spawn(move || head.then(|x| x + 5).then(|y| y.to_string()).wait())
//! };
//! head.post(10).unwrap();
//! assert_eq!(consumer.join().unwrap(), Ok::<_, Error>("15".to_string()));
//! ```

mod chain;
mod done;
mod promise;
mod wait;

pub use chain::Downstream;
pub use done::Done;
pub use promise::Promise;
pub use wait::{WaitDone, WaitValue};

/// Misuse of a node, reported instead of silently corrupting its state.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The node already received its value; the new one was dropped.
    #[error("the promise was already posted")]
    AlreadyPosted,
    /// An earlier `wait` moved the value out of the node.
    #[error("the promised value was already taken")]
    Taken,
}
