//! Repository implementations over the transactional storage engine.
//!
//! This is where engine signals (SQLSTATE code + constraint name) become
//! [`SegmentError`] variants. The store never pre-checks existence; it
//! attempts the write and classifies the violation.

use crate::repo::{AuditRepo, MembershipRepo, SegmentRepo, UserRepo};
use chrono::{DateTime, Utc};
use cohort_core::{
    AuditRecord, Expiration, Membership, ResultExt, SegmentError, SegmentResult, UserId,
};
use cohort_storage::error::{FOREIGN_KEY_VIOLATION, UNIQUE_VIOLATION};
use cohort_storage::{schema, Database, StorageError, Transaction};
use std::sync::Arc;
use tracing::{debug, info};

/// Engine-backed store implementing every repository trait.
#[derive(Clone)]
pub struct EngineStore {
    db: Arc<Database>,
}

impl EngineStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn in_memory() -> Self {
        info!("Segment store initialized (in-memory engine)");
        Self::new(Arc::new(Database::new()))
    }
}

fn segment_error(err: StorageError, slug: &str) -> SegmentError {
    match (err.code(), err.constraint()) {
        (UNIQUE_VIOLATION, schema::SEGMENTS_PKEY) => SegmentError::SegmentAlreadyExists {
            slug: slug.to_string(),
        },
        _ => SegmentError::Internal(err.to_string()),
    }
}

fn membership_error(err: StorageError, user_id: UserId, slug: &str) -> SegmentError {
    match (err.code(), err.constraint()) {
        (FOREIGN_KEY_VIOLATION, schema::MEMBERSHIPS_USER_FKEY) => {
            SegmentError::UserNotFound { user_id }
        }
        (FOREIGN_KEY_VIOLATION, schema::MEMBERSHIPS_SEGMENT_FKEY) => {
            SegmentError::SegmentNotFound {
                slug: slug.to_string(),
            }
        }
        (UNIQUE_VIOLATION, schema::MEMBERSHIPS_PKEY) => SegmentError::AlreadyAssigned {
            user_id,
            slug: slug.to_string(),
        },
        _ => SegmentError::Internal(err.to_string()),
    }
}

fn user_error(err: StorageError, name: &str) -> SegmentError {
    match (err.code(), err.constraint()) {
        (UNIQUE_VIOLATION, schema::USERS_NAME_KEY) => SegmentError::UserAlreadyExists {
            name: name.to_string(),
        },
        _ => SegmentError::Internal(err.to_string()),
    }
}

/// Insert a membership. An expired row still owns the primary key, so a
/// duplicate-key violation against an expired row replaces it in place.
fn insert_membership(
    tx: &mut Transaction<'_>,
    membership: &Membership,
    at: DateTime<Utc>,
) -> SegmentResult<()> {
    let user_id = membership.user_id;
    let slug = membership.segment_slug.as_str();
    match tx.insert_membership(membership) {
        Ok(()) => Ok(()),
        Err(err) if err.code() == UNIQUE_VIOLATION => {
            let revived = tx.update_membership_if(user_id, slug, membership.expiration, |row| {
                !row.is_active_at(at)
            });
            if revived == 1 {
                debug!(user_id = %user_id, slug, "Replaced expired membership");
                Ok(())
            } else {
                Err(membership_error(err, user_id, slug))
            }
        }
        Err(err) => Err(membership_error(err, user_id, slug)),
    }
}

impl SegmentRepo for EngineStore {
    fn insert_segment(&self, slug: &str) -> SegmentResult<()> {
        let mut tx = self.db.begin();
        tx.insert_segment(slug)
            .map_err(|e| segment_error(e, slug))
            .op("store.segment.insert")?;
        tx.commit();
        Ok(())
    }

    fn delete_segment(&self, slug: &str, at: DateTime<Utc>) -> SegmentResult<()> {
        let mut tx = self.db.begin();
        let cascaded: Vec<Membership> = tx
            .memberships_for_segment(slug)
            .into_iter()
            .filter(|m| m.is_active_at(at))
            .collect();
        if tx.delete_segment(slug) == 0 {
            return Err(SegmentError::SegmentNotFound {
                slug: slug.to_string(),
            }
            .context("store.segment.delete"));
        }
        for membership in &cascaded {
            tx.append_audit(membership.user_id, slug, false, at);
        }
        tx.commit();
        Ok(())
    }

    fn create_segment_with_members(
        &self,
        slug: &str,
        at: DateTime<Utc>,
        select: &mut dyn FnMut(&[UserId]) -> Vec<UserId>,
    ) -> SegmentResult<Vec<UserId>> {
        let op = "store.segment.create_with_members";
        let mut tx = self.db.begin();
        tx.insert_segment(slug)
            .map_err(|e| segment_error(e, slug))
            .op(op)?;

        let population = tx.user_ids();
        let selected = select(&population);
        for &user_id in &selected {
            let membership = Membership {
                user_id,
                segment_slug: slug.to_string(),
                expiration: Expiration::Never,
            };
            tx.insert_membership(&membership)
                .map_err(|e| membership_error(e, user_id, slug))
                .op(op)?;
            tx.append_audit(user_id, slug, true, at);
        }
        tx.commit();
        Ok(selected)
    }
}

impl MembershipRepo for EngineStore {
    fn apply_changes(
        &self,
        user_id: UserId,
        adds: &[Membership],
        removes: &[String],
        at: DateTime<Utc>,
    ) -> SegmentResult<Vec<AuditRecord>> {
        let op = "store.membership.apply";
        let mut tx = self.db.begin();
        let mut records = Vec::with_capacity(adds.len() + removes.len());

        for slug in removes {
            if tx.delete_membership_if(user_id, slug, |m| m.is_active_at(at)) == 0 {
                return Err(SegmentError::MembershipNotFound {
                    user_id,
                    slug: slug.clone(),
                }
                .context(op));
            }
            records.push(tx.append_audit(user_id, slug, false, at));
        }

        for membership in adds {
            insert_membership(&mut tx, membership, at).op(op)?;
            records.push(tx.append_audit(user_id, &membership.segment_slug, true, at));
        }

        tx.commit();
        Ok(records)
    }

    fn active_memberships(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> SegmentResult<Vec<Membership>> {
        let tx = self.db.begin();
        Ok(tx
            .memberships_for_user(user_id)
            .into_iter()
            .filter(|m| m.is_active_at(at))
            .collect())
    }
}

impl AuditRepo for EngineStore {
    fn records_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SegmentResult<Vec<AuditRecord>> {
        let tx = self.db.begin();
        Ok(tx.audit_between(from, to))
    }
}

impl UserRepo for EngineStore {
    fn insert_user(&self, name: &str, credential: &str) -> SegmentResult<UserId> {
        let mut tx = self.db.begin();
        let id = tx
            .insert_user(name, credential)
            .map_err(|e| user_error(e, name))
            .op("store.user.insert")?;
        tx.commit();
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use cohort_core::ErrorKind;

    fn seeded() -> (EngineStore, UserId) {
        let store = EngineStore::in_memory();
        let uid = store.insert_user("alice", "digest").unwrap();
        store.insert_segment("beta").unwrap();
        store.insert_segment("gamma").unwrap();
        (store, uid)
    }

    fn member(user_id: UserId, slug: &str, expiration: Expiration) -> Membership {
        Membership {
            user_id,
            segment_slug: slug.to_string(),
            expiration,
        }
    }

    #[test]
    fn test_fk_violations_map_to_not_found() {
        let (store, uid) = seeded();
        let now = Utc::now();

        let err = store
            .apply_changes(UserId(42), &[member(UserId(42), "beta", Expiration::Never)], &[], now)
            .unwrap_err();
        assert_eq!(err.root(), &SegmentError::UserNotFound { user_id: UserId(42) });

        let err = store
            .apply_changes(uid, &[member(uid, "nope", Expiration::Never)], &[], now)
            .unwrap_err();
        assert_eq!(
            err.root(),
            &SegmentError::SegmentNotFound {
                slug: "nope".into()
            }
        );
    }

    #[test]
    fn test_failed_batch_leaves_no_rows_or_audit() {
        let (store, uid) = seeded();
        let now = Utc::now();
        let adds = vec![
            member(uid, "beta", Expiration::Never),
            member(uid, "gamma", Expiration::Never),
            member(uid, "missing", Expiration::Never),
        ];
        let err = store.apply_changes(uid, &adds, &[], now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert!(store.active_memberships(uid, now).unwrap().is_empty());
        let audit = store
            .records_between(now - Duration::days(1), now + Duration::days(1))
            .unwrap();
        assert!(audit.is_empty());
    }

    #[test]
    fn test_duplicate_active_membership_is_already_assigned() {
        let (store, uid) = seeded();
        let now = Utc::now();
        store
            .apply_changes(uid, &[member(uid, "beta", Expiration::Never)], &[], now)
            .unwrap();
        let err = store
            .apply_changes(uid, &[member(uid, "beta", Expiration::Never)], &[], now)
            .unwrap_err();
        assert_eq!(
            err.root(),
            &SegmentError::AlreadyAssigned {
                user_id: uid,
                slug: "beta".into()
            }
        );
    }

    #[test]
    fn test_expired_membership_can_be_added_again() {
        let (store, uid) = seeded();
        let then = Utc::now() - Duration::days(10);
        store
            .apply_changes(
                uid,
                &[member(uid, "beta", Expiration::At(then + Duration::days(1)))],
                &[],
                then,
            )
            .unwrap();

        let now = Utc::now();
        assert!(store.active_memberships(uid, now).unwrap().is_empty());
        store
            .apply_changes(uid, &[member(uid, "beta", Expiration::Never)], &[], now)
            .unwrap();
        let active = store.active_memberships(uid, now).unwrap();
        assert_eq!(active, vec![member(uid, "beta", Expiration::Never)]);
    }

    #[test]
    fn test_removing_expired_membership_is_not_found() {
        let (store, uid) = seeded();
        let then = Utc::now() - Duration::days(10);
        store
            .apply_changes(
                uid,
                &[member(uid, "beta", Expiration::At(then + Duration::days(1)))],
                &[],
                then,
            )
            .unwrap();
        let err = store
            .apply_changes(uid, &[], &["beta".to_string()], Utc::now())
            .unwrap_err();
        assert_eq!(
            err.root(),
            &SegmentError::MembershipNotFound {
                user_id: uid,
                slug: "beta".into()
            }
        );
    }

    #[test]
    fn test_delete_segment_audits_cascaded_removals() {
        let (store, uid) = seeded();
        let now = Utc::now();
        store
            .apply_changes(uid, &[member(uid, "beta", Expiration::Never)], &[], now)
            .unwrap();
        store.delete_segment("beta", now).unwrap();

        assert!(store.active_memberships(uid, now).unwrap().is_empty());
        let audit = store
            .records_between(now, now + Duration::seconds(1))
            .unwrap();
        assert_eq!(audit.len(), 2);
        assert!(audit[0].is_added);
        assert!(!audit[1].is_added);

        let err = store.delete_segment("beta", now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_create_with_members_rolls_back_on_existing_slug() {
        let (store, _) = seeded();
        let mut called = false;
        let err = store
            .create_segment_with_members("beta", Utc::now(), &mut |_: &[UserId]| {
                called = true;
                Vec::new()
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(!called);
    }

    #[test]
    fn test_duplicate_user_name() {
        let (store, _) = seeded();
        let err = store.insert_user("alice", "other").unwrap_err();
        assert_eq!(
            err.root(),
            &SegmentError::UserAlreadyExists {
                name: "alice".into()
            }
        );
    }
}
