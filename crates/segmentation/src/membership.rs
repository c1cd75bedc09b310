//! Membership manager — time-bounded user↔segment associations.
//!
//! Every batch is a single storage transaction: one failing line item
//! aborts the whole request, audit records included. Expiry is evaluated
//! lazily on read; nothing here ever purges expired rows.

use crate::registry::validate_slug;
use crate::repo::MembershipRepo;
use chrono::{DateTime, Utc};
use cohort_core::config::MembershipConfig;
use cohort_core::{
    AuditRecord, Expiration, Membership, ResultExt, SegmentError, SegmentResult, SegmentTtl,
    UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::info;

/// Slugs to add (with TTL) and remove for one user in one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipChanges {
    #[serde(default)]
    pub add: Vec<SegmentTtl>,
    #[serde(default)]
    pub remove: Vec<String>,
}

/// Fails with `ConflictingRequest` listing every slug that is both added and
/// removed.
pub fn check_disjoint(add: &[SegmentTtl], remove: &[String]) -> SegmentResult<()> {
    let added: HashSet<&str> = add.iter().map(|item| item.slug.as_str()).collect();
    let overlap: BTreeSet<&str> = remove
        .iter()
        .map(String::as_str)
        .filter(|slug| added.contains(slug))
        .collect();
    if overlap.is_empty() {
        Ok(())
    } else {
        Err(SegmentError::ConflictingRequest {
            slugs: overlap.into_iter().map(str::to_string).collect(),
        })
    }
}

pub struct MembershipManager {
    repo: Arc<dyn MembershipRepo>,
    limits: MembershipConfig,
}

impl MembershipManager {
    pub fn new(repo: Arc<dyn MembershipRepo>, limits: MembershipConfig) -> Self {
        Self { repo, limits }
    }

    pub fn add_user_segments(
        &self,
        user_id: UserId,
        items: &[SegmentTtl],
    ) -> SegmentResult<Vec<AuditRecord>> {
        self.add_user_segments_at(user_id, items, Utc::now())
    }

    pub fn add_user_segments_at(
        &self,
        user_id: UserId,
        items: &[SegmentTtl],
        now: DateTime<Utc>,
    ) -> SegmentResult<Vec<AuditRecord>> {
        self.apply("membership.add", user_id, items, &[], now)
    }

    pub fn remove_user_segments(
        &self,
        user_id: UserId,
        slugs: &[String],
    ) -> SegmentResult<Vec<AuditRecord>> {
        self.remove_user_segments_at(user_id, slugs, Utc::now())
    }

    pub fn remove_user_segments_at(
        &self,
        user_id: UserId,
        slugs: &[String],
        now: DateTime<Utc>,
    ) -> SegmentResult<Vec<AuditRecord>> {
        self.apply("membership.remove", user_id, &[], slugs, now)
    }

    /// Removals then additions, in one transaction. Overlapping slugs are
    /// rejected before storage is touched.
    pub fn edit_user_segments(
        &self,
        user_id: UserId,
        changes: &MembershipChanges,
    ) -> SegmentResult<Vec<AuditRecord>> {
        self.edit_user_segments_at(user_id, changes, Utc::now())
    }

    pub fn edit_user_segments_at(
        &self,
        user_id: UserId,
        changes: &MembershipChanges,
        now: DateTime<Utc>,
    ) -> SegmentResult<Vec<AuditRecord>> {
        self.apply(
            "membership.edit",
            user_id,
            &changes.add,
            &changes.remove,
            now,
        )
    }

    /// Memberships whose expiration is strictly after now.
    pub fn current_segments(&self, user_id: UserId) -> SegmentResult<Vec<Membership>> {
        self.current_segments_at(user_id, Utc::now())
    }

    pub fn current_segments_at(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> SegmentResult<Vec<Membership>> {
        self.repo
            .active_memberships(user_id, at)
            .op("membership.current")
    }

    fn apply(
        &self,
        op: &'static str,
        user_id: UserId,
        add: &[SegmentTtl],
        remove: &[String],
        now: DateTime<Utc>,
    ) -> SegmentResult<Vec<AuditRecord>> {
        check_disjoint(add, remove).op(op)?;
        self.validate(add, remove).op(op)?;
        if add.is_empty() && remove.is_empty() {
            return Ok(Vec::new());
        }

        let adds: Vec<Membership> = add
            .iter()
            .map(|item| Membership {
                user_id,
                segment_slug: item.slug.clone(),
                expiration: Expiration::from_ttl(now, item.ttl_days),
            })
            .collect();

        let records = self.repo.apply_changes(user_id, &adds, remove, now).op(op)?;
        info!(
            user_id = %user_id,
            added = adds.len(),
            removed = remove.len(),
            "User segments updated"
        );
        Ok(records)
    }

    fn validate(&self, add: &[SegmentTtl], remove: &[String]) -> SegmentResult<()> {
        let max = self.limits.max_batch_items;
        if add.len() > max || remove.len() > max {
            return Err(SegmentError::validation(format!(
                "at most {max} segments may be added or removed per request"
            )));
        }
        for item in add {
            validate_slug(&item.slug, self.limits.max_slug_len)?;
            if item.ttl_days > self.limits.max_ttl_days {
                return Err(SegmentError::validation(format!(
                    "ttl for '{}' must be at most {} days",
                    item.slug, self.limits.max_ttl_days
                )));
            }
        }
        for slug in remove {
            validate_slug(slug, self.limits.max_slug_len)?;
        }
        Ok(())
    }
}
