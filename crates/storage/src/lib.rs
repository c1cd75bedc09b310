//! In-memory transactional storage engine for segments, users, memberships
//! and the membership audit log.
//!
//! Writers are serialized: a [`Transaction`] holds the engine lock for its
//! whole lifetime and is rolled back on drop unless [`Transaction::commit`]
//! was called. Constraint violations are reported with SQLSTATE codes and
//! constraint names so callers can classify them.

pub mod engine;
pub mod error;
pub mod schema;

pub use engine::{Database, Transaction};
pub use error::{StorageError, StorageResult};
