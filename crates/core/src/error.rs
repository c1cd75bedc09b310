use thiserror::Error;

use crate::types::UserId;

pub type SegmentResult<T> = Result<T, SegmentError>;

/// Coarse classification callers match on (and transports map to statuses).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    Validation,
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("user {user_id} not found")]
    UserNotFound { user_id: UserId },

    #[error("segment '{slug}' not found")]
    SegmentNotFound { slug: String },

    #[error("user {user_id} is not assigned segment '{slug}'")]
    MembershipNotFound { user_id: UserId, slug: String },

    #[error("segment '{slug}' already exists")]
    SegmentAlreadyExists { slug: String },

    #[error("user '{name}' already exists")]
    UserAlreadyExists { name: String },

    #[error("user {user_id} is already assigned segment '{slug}'")]
    AlreadyAssigned { user_id: UserId, slug: String },

    #[error("added and removed segments intersect: {slugs:?}")]
    ConflictingRequest { slugs: Vec<String> },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{op}: {source}")]
    Context {
        op: &'static str,
        #[source]
        source: Box<SegmentError>,
    },
}

impl SegmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SegmentError::UserNotFound { .. }
            | SegmentError::SegmentNotFound { .. }
            | SegmentError::MembershipNotFound { .. } => ErrorKind::NotFound,
            SegmentError::SegmentAlreadyExists { .. }
            | SegmentError::UserAlreadyExists { .. }
            | SegmentError::AlreadyAssigned { .. } => ErrorKind::AlreadyExists,
            SegmentError::ConflictingRequest { .. } => ErrorKind::Conflict,
            SegmentError::Validation(_) => ErrorKind::Validation,
            SegmentError::Internal(_) => ErrorKind::Internal,
            SegmentError::Context { source, .. } => source.kind(),
        }
    }

    /// The innermost error with every operation context stripped.
    pub fn root(&self) -> &SegmentError {
        match self {
            SegmentError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Wrap with the name of the operation that failed.
    pub fn context(self, op: &'static str) -> Self {
        SegmentError::Context {
            op,
            source: Box::new(self),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        SegmentError::Validation(msg.into())
    }
}

/// `.op("membership.add")?` on any `SegmentResult`.
pub trait ResultExt<T> {
    fn op(self, op: &'static str) -> SegmentResult<T>;
}

impl<T> ResultExt<T> for SegmentResult<T> {
    fn op(self, op: &'static str) -> SegmentResult<T> {
        self.map_err(|e| e.context(op))
    }
}
