//! Domain types, error taxonomy and configuration for the segment-membership
//! service.

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{ErrorKind, ResultExt, SegmentError, SegmentResult};
pub use types::{AuditRecord, Expiration, Membership, Segment, SegmentTtl, User, UserId};
