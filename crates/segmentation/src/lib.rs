//! Segment membership service — named segments, time-bounded user
//! memberships, percentage auto-assignment and a monthly audit export.
//!
//! Components talk to storage through the traits in [`repo`];
//! [`store::EngineStore`] implements all of them on top of the
//! transactional in-memory engine from `cohort-storage`.

pub mod audit;
pub mod auto_assign;
pub mod export;
pub mod membership;
pub mod registry;
pub mod repo;
pub mod service;
pub mod store;
pub mod users;

pub use audit::{month_window, AuditHistory};
pub use auto_assign::AutoAssigner;
pub use export::{ExportedFile, HistoryExporter};
pub use membership::{check_disjoint, MembershipChanges, MembershipManager};
pub use registry::SegmentRegistry;
pub use repo::{AuditRepo, MembershipRepo, SegmentRepo, UserRepo};
pub use service::SegmentService;
pub use store::EngineStore;
pub use users::UserDirectory;
