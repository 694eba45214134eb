//!  Local storage is organized through [queue_store::SqliteQueueStore].
//!  The basic idea is:
//!   - There is a single SQLite table with every record that hasn't been acknowledged yet.
//!   - Records are inserted once and deleted once the endpoint accepts them. They are never
//!     updated.
//!   - Every write is committed before the call returns, so a crash right after
//!     [queue_store::QueueStore::enqueue] doesn't lose the record.

pub mod entities;
pub mod queue_store;
