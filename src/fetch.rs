//! Operation descriptors, fetch keys, and the executor seam that the rest of
//! the crate drives.

pub mod executor;
pub mod key;

pub use executor::{FetchExecutor, FetchFuture};
pub use key::{FetchKey, FetchRequest};
