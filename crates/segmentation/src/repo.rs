//! Storage contracts, one per component, so storage can be swapped or faked.

use chrono::{DateTime, Utc};
use cohort_core::{AuditRecord, Membership, SegmentResult, UserId};

pub trait SegmentRepo: Send + Sync {
    fn insert_segment(&self, slug: &str) -> SegmentResult<()>;

    /// Delete the segment and every membership in it. Active memberships
    /// removed by the cascade are audited as removals at `at`.
    fn delete_segment(&self, slug: &str, at: DateTime<Utc>) -> SegmentResult<()>;

    /// In one transaction: create the segment, hand the current user
    /// population (ascending ids) to `select`, and give every selected user a
    /// permanent membership. Returns the selected ids.
    fn create_segment_with_members(
        &self,
        slug: &str,
        at: DateTime<Utc>,
        select: &mut dyn FnMut(&[UserId]) -> Vec<UserId>,
    ) -> SegmentResult<Vec<UserId>>;
}

pub trait MembershipRepo: Send + Sync {
    /// In one transaction: delete each active `(user_id, slug)` in `removes`,
    /// then insert each of `adds`, auditing every line item at `at`.
    fn apply_changes(
        &self,
        user_id: UserId,
        adds: &[Membership],
        removes: &[String],
        at: DateTime<Utc>,
    ) -> SegmentResult<Vec<AuditRecord>>;

    /// Memberships of the user that are still active at `at`.
    fn active_memberships(&self, user_id: UserId, at: DateTime<Utc>)
        -> SegmentResult<Vec<Membership>>;
}

pub trait AuditRepo: Send + Sync {
    /// Records with `from <= timestamp < to`, ascending by operation id.
    fn records_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SegmentResult<Vec<AuditRecord>>;
}

pub trait UserRepo: Send + Sync {
    fn insert_user(&self, name: &str, credential: &str) -> SegmentResult<UserId>;
}
