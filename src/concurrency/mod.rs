//! Cooperative cancellation primitives shared by every dispatcher loop.

mod cancel;

pub use cancel::{CancelScope, CancelToken};
