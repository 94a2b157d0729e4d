//! Cross-process and in-process duplicate-work suppression.
//!
//! The distributed lock delegates mutual exclusion to the shared cache; the
//! coalescer collapses concurrent identical calls within one process.

pub mod coalescer;
pub mod lock;

pub use coalescer::RequestCoalescer;
pub use lock::DistributedLock;
