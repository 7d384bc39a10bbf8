//! Bounded polling of a single target: the retry session state machine, its
//! completion predicates and delay policy, and the async coordinator that
//! drives attempts.

pub mod backoff;
pub mod coordinator;
pub mod predicate;
pub mod session;

pub use backoff::DelayPolicy;
pub use coordinator::{PollError, PollingCoordinator};
pub use predicate::{Completion, NonEmptyAt};
pub use session::{AttemptOutcome, PollEvent, PollState, RetrySession};
