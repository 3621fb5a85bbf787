//! Queue store implementations.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod pgmq;

pub use memory::InMemoryQueueStore;

#[cfg(feature = "postgres")]
pub use pgmq::PgmqStore;
