//! Concurrency coordination: the worker pool, the sequence barrier and the
//! ordered fetch built from both.

pub mod barrier;
pub mod executor;
pub mod ordered;

pub use executor::{Coordinator, ProgressMode, WorkerSlot};
pub use ordered::{NotFound, OrderedFetch, Retrieved};
