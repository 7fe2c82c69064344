use crate::Error;

/// A node that can be owned by a [`Promise`](crate::Promise) as its successor.
///
/// The upstream node builds its successor with [`Default`] when it is itself
/// built, so the entire chain exists before any value or continuation does.
pub trait Downstream: Default {
    /// The value this node receives from the upstream continuation.
    type Input;

    /// Input delivered as soon as the upstream node is posted, whether or not
    /// a continuation is registered there.
    ///
    /// Chained nodes return `None` and only hear from their upstream through
    /// its continuation. The void terminal completes unconditionally.
    fn eager_input() -> Option<Self::Input> {
        None
    }

    /// Hands `value` to this node.
    fn post(&self, value: Self::Input) -> Result<(), Error>;
}

/// Spells the type of a chain from its stage types, head first.
///
/// ```
/// use promise_chain::{chain, Done, Promise};
///
/// let _: chain!(i32, i32, String) = Promise::<i32, Promise<i32, Promise<String, Done>>>::new();
/// ```
#[macro_export]
macro_rules! chain {
    ($value:ty) => {
        $crate::Promise<$value>
    };
    ($value:ty, $($rest:ty),+) => {
        $crate::Promise<$value, $crate::chain!($($rest),+)>
    };
}
