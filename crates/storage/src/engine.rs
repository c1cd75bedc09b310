//! Single-writer engine with undo-log rollback.

use crate::error::{StorageError, StorageResult};
use crate::schema;
use chrono::{DateTime, Utc};
use cohort_core::{AuditRecord, Expiration, Membership, User, UserId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

type MembershipKey = (UserId, String);

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    user_names: HashMap<String, UserId>,
    segments: BTreeSet<String>,
    memberships: BTreeMap<MembershipKey, Expiration>,
    /// Append-only, ascending by operation id.
    audit_log: Vec<AuditRecord>,
    // Sequences are never rewound, even when a transaction rolls back.
    next_user_id: i64,
    next_operation_id: u64,
}

/// Inverse of one mutation, replayed newest-first on rollback.
enum Undo {
    UserInserted(UserId),
    SegmentInserted(String),
    SegmentDeleted {
        slug: String,
        memberships: Vec<(MembershipKey, Expiration)>,
    },
    MembershipInserted(MembershipKey),
    MembershipUpdated(MembershipKey, Expiration),
    MembershipDeleted(MembershipKey, Expiration),
    AuditAppended,
}

/// Shared handle to the engine.
pub struct Database {
    tables: Mutex<Tables>,
    next_txid: AtomicU64,
}

impl Database {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                next_user_id: 1,
                next_operation_id: 1,
                ..Tables::default()
            }),
            next_txid: AtomicU64::new(1),
        }
    }

    /// Begin a transaction. Blocks while another transaction is open.
    pub fn begin(&self) -> Transaction<'_> {
        let tables = self.tables.lock();
        let id = self.next_txid.fetch_add(1, Ordering::SeqCst);
        Transaction {
            id,
            tables,
            undo: Vec::new(),
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive transaction over the engine. Dropping it without calling
/// [`Transaction::commit`] undoes every mutation it made.
pub struct Transaction<'a> {
    id: u64,
    tables: MutexGuard<'a, Tables>,
    undo: Vec<Undo>,
}

impl<'a> Transaction<'a> {
    pub fn commit(mut self) {
        debug!(txid = self.id, writes = self.undo.len(), "Transaction committed");
        self.undo.clear();
    }

    // ─── Users ─────────────────────────────────────────────────────────────

    pub fn insert_user(&mut self, name: &str, credential: &str) -> StorageResult<UserId> {
        if self.tables.user_names.contains_key(name) {
            return Err(StorageError::UniqueViolation {
                constraint: schema::USERS_NAME_KEY,
            });
        }
        let id = UserId(self.tables.next_user_id);
        self.tables.next_user_id += 1;
        self.tables.user_names.insert(name.to_string(), id);
        self.tables.users.insert(
            id,
            User {
                id,
                name: name.to_string(),
                credential: credential.to_string(),
            },
        );
        self.undo.push(Undo::UserInserted(id));
        Ok(id)
    }

    /// All user ids, ascending.
    pub fn user_ids(&self) -> Vec<UserId> {
        self.tables.users.keys().copied().collect()
    }

    // ─── Segments ──────────────────────────────────────────────────────────

    pub fn insert_segment(&mut self, slug: &str) -> StorageResult<()> {
        if !self.tables.segments.insert(slug.to_string()) {
            return Err(StorageError::UniqueViolation {
                constraint: schema::SEGMENTS_PKEY,
            });
        }
        self.undo.push(Undo::SegmentInserted(slug.to_string()));
        Ok(())
    }

    pub fn segment_exists(&self, slug: &str) -> bool {
        self.tables.segments.contains(slug)
    }

    /// Delete a segment and cascade to its memberships. Returns rows affected
    /// in `segments` (0 or 1).
    pub fn delete_segment(&mut self, slug: &str) -> u64 {
        if !self.tables.segments.remove(slug) {
            return 0;
        }
        let keys: Vec<MembershipKey> = self
            .tables
            .memberships
            .keys()
            .filter(|(_, s)| s == slug)
            .cloned()
            .collect();
        let mut cascaded = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(expiration) = self.tables.memberships.remove(&key) {
                cascaded.push((key, expiration));
            }
        }
        self.undo.push(Undo::SegmentDeleted {
            slug: slug.to_string(),
            memberships: cascaded,
        });
        1
    }

    // ─── Memberships ───────────────────────────────────────────────────────

    pub fn insert_membership(&mut self, membership: &Membership) -> StorageResult<()> {
        let key = (membership.user_id, membership.segment_slug.clone());
        if self.tables.memberships.contains_key(&key) {
            return Err(StorageError::UniqueViolation {
                constraint: schema::MEMBERSHIPS_PKEY,
            });
        }
        if !self.tables.users.contains_key(&membership.user_id) {
            return Err(StorageError::ForeignKeyViolation {
                constraint: schema::MEMBERSHIPS_USER_FKEY,
            });
        }
        if !self.tables.segments.contains(&membership.segment_slug) {
            return Err(StorageError::ForeignKeyViolation {
                constraint: schema::MEMBERSHIPS_SEGMENT_FKEY,
            });
        }
        self.tables.memberships.insert(key.clone(), membership.expiration);
        self.undo.push(Undo::MembershipInserted(key));
        Ok(())
    }

    /// `UPDATE memberships SET expiration = $3 WHERE user_id = $1 AND
    /// segment_slug = $2 AND <only_if>`. Returns rows affected.
    pub fn update_membership_if(
        &mut self,
        user_id: UserId,
        slug: &str,
        expiration: Expiration,
        only_if: impl FnOnce(&Membership) -> bool,
    ) -> u64 {
        let key = (user_id, slug.to_string());
        let Some(current) = self.membership(user_id, slug) else {
            return 0;
        };
        if !only_if(&current) {
            return 0;
        }
        self.tables.memberships.insert(key.clone(), expiration);
        self.undo
            .push(Undo::MembershipUpdated(key, current.expiration));
        1
    }

    /// `DELETE FROM memberships WHERE user_id = $1 AND segment_slug = $2 AND
    /// <only_if>`. Returns rows affected.
    pub fn delete_membership_if(
        &mut self,
        user_id: UserId,
        slug: &str,
        only_if: impl FnOnce(&Membership) -> bool,
    ) -> u64 {
        let key = (user_id, slug.to_string());
        let Some(current) = self.membership(user_id, slug) else {
            return 0;
        };
        if !only_if(&current) {
            return 0;
        }
        self.tables.memberships.remove(&key);
        self.undo
            .push(Undo::MembershipDeleted(key, current.expiration));
        1
    }

    pub fn membership(&self, user_id: UserId, slug: &str) -> Option<Membership> {
        self.tables
            .memberships
            .get(&(user_id, slug.to_string()))
            .map(|expiration| Membership {
                user_id,
                segment_slug: slug.to_string(),
                expiration: *expiration,
            })
    }

    /// Every stored row for the user, expired ones included, ordered by slug.
    pub fn memberships_for_user(&self, user_id: UserId) -> Vec<Membership> {
        self.tables
            .memberships
            .range((user_id, String::new())..)
            .take_while(|((uid, _), _)| *uid == user_id)
            .map(|((uid, slug), expiration)| Membership {
                user_id: *uid,
                segment_slug: slug.clone(),
                expiration: *expiration,
            })
            .collect()
    }

    pub fn memberships_for_segment(&self, slug: &str) -> Vec<Membership> {
        self.tables
            .memberships
            .iter()
            .filter(|((_, s), _)| s == slug)
            .map(|((uid, s), expiration)| Membership {
                user_id: *uid,
                segment_slug: s.clone(),
                expiration: *expiration,
            })
            .collect()
    }

    // ─── Audit log ─────────────────────────────────────────────────────────

    pub fn append_audit(
        &mut self,
        user_id: UserId,
        slug: &str,
        is_added: bool,
        timestamp: DateTime<Utc>,
    ) -> AuditRecord {
        let operation_id = self.tables.next_operation_id;
        self.tables.next_operation_id += 1;
        let record = AuditRecord {
            operation_id,
            user_id,
            segment_slug: slug.to_string(),
            is_added,
            timestamp,
        };
        self.tables.audit_log.push(record.clone());
        self.undo.push(Undo::AuditAppended);
        record
    }

    /// Records with `from <= timestamp < to`, ascending by operation id.
    pub fn audit_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<AuditRecord> {
        self.tables
            .audit_log
            .iter()
            .filter(|r| r.timestamp >= from && r.timestamp < to)
            .cloned()
            .collect()
    }

    fn undo_all(&mut self) {
        let undo = std::mem::take(&mut self.undo);
        let tables = &mut *self.tables;
        for op in undo.into_iter().rev() {
            match op {
                Undo::UserInserted(id) => {
                    if let Some(user) = tables.users.remove(&id) {
                        tables.user_names.remove(&user.name);
                    }
                }
                Undo::SegmentInserted(slug) => {
                    tables.segments.remove(&slug);
                }
                Undo::SegmentDeleted { slug, memberships } => {
                    tables.segments.insert(slug);
                    tables.memberships.extend(memberships);
                }
                Undo::MembershipInserted(key) => {
                    tables.memberships.remove(&key);
                }
                Undo::MembershipUpdated(key, previous) | Undo::MembershipDeleted(key, previous) => {
                    tables.memberships.insert(key, previous);
                }
                Undo::AuditAppended => {
                    tables.audit_log.pop();
                }
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            debug!(txid = self.id, writes = self.undo.len(), "Transaction rolled back");
            self.undo_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn membership(user_id: UserId, slug: &str, expiration: Expiration) -> Membership {
        Membership {
            user_id,
            segment_slug: slug.to_string(),
            expiration,
        }
    }

    #[test]
    fn test_commit_persists() {
        let db = Database::new();
        let mut tx = db.begin();
        let uid = tx.insert_user("alice", "x").unwrap();
        tx.insert_segment("beta").unwrap();
        tx.insert_membership(&membership(uid, "beta", Expiration::Never))
            .unwrap();
        tx.commit();

        let tx = db.begin();
        assert!(tx.segment_exists("beta"));
        assert_eq!(tx.memberships_for_user(uid).len(), 1);
    }

    #[test]
    fn test_drop_rolls_back_everything() {
        let db = Database::new();
        let mut tx = db.begin();
        tx.insert_user("alice", "x").unwrap();
        tx.insert_segment("beta").unwrap();
        tx.commit();

        {
            let mut tx = db.begin();
            tx.insert_segment("gamma").unwrap();
            tx.insert_membership(&membership(UserId(1), "beta", Expiration::Never))
                .unwrap();
            tx.append_audit(UserId(1), "beta", true, Utc::now());
            assert_eq!(tx.delete_segment("beta"), 1);
            // dropped without commit
        }

        let tx = db.begin();
        assert!(tx.segment_exists("beta"));
        assert!(!tx.segment_exists("gamma"));
        assert!(tx.memberships_for_user(UserId(1)).is_empty());
        assert!(tx
            .audit_between(Utc::now() - Duration::days(1), Utc::now() + Duration::days(1))
            .is_empty());
    }

    #[test]
    fn test_delete_segment_cascades_and_rollback_restores() {
        let db = Database::new();
        let mut tx = db.begin();
        let uid = tx.insert_user("alice", "x").unwrap();
        tx.insert_segment("beta").unwrap();
        tx.insert_membership(&membership(uid, "beta", Expiration::Never))
            .unwrap();
        tx.commit();

        let mut tx = db.begin();
        assert_eq!(tx.delete_segment("beta"), 1);
        assert!(tx.memberships_for_user(uid).is_empty());
        drop(tx);

        let mut tx = db.begin();
        assert_eq!(tx.memberships_for_segment("beta").len(), 1);
        assert_eq!(tx.delete_segment("beta"), 1);
        assert_eq!(tx.delete_segment("beta"), 0);
        tx.commit();

        let tx = db.begin();
        assert!(tx.memberships_for_user(uid).is_empty());
    }

    #[test]
    fn test_constraint_violations() {
        let db = Database::new();
        let mut tx = db.begin();
        let uid = tx.insert_user("alice", "x").unwrap();
        tx.insert_segment("beta").unwrap();

        let err = tx.insert_segment("beta").unwrap_err();
        assert_eq!(err.code(), "23505");
        assert_eq!(err.constraint(), schema::SEGMENTS_PKEY);

        let err = tx.insert_user("alice", "y").unwrap_err();
        assert_eq!(err.constraint(), schema::USERS_NAME_KEY);

        let err = tx
            .insert_membership(&membership(UserId(99), "beta", Expiration::Never))
            .unwrap_err();
        assert_eq!(err.code(), "23503");
        assert_eq!(err.constraint(), schema::MEMBERSHIPS_USER_FKEY);

        let err = tx
            .insert_membership(&membership(uid, "missing", Expiration::Never))
            .unwrap_err();
        assert_eq!(err.constraint(), schema::MEMBERSHIPS_SEGMENT_FKEY);

        tx.insert_membership(&membership(uid, "beta", Expiration::Never))
            .unwrap();
        let err = tx
            .insert_membership(&membership(uid, "beta", Expiration::Never))
            .unwrap_err();
        assert_eq!(err.constraint(), schema::MEMBERSHIPS_PKEY);
    }

    #[test]
    fn test_conditional_update_and_delete() {
        let db = Database::new();
        let mut tx = db.begin();
        let uid = tx.insert_user("alice", "x").unwrap();
        tx.insert_segment("beta").unwrap();
        let past = Utc::now() - Duration::days(1);
        tx.insert_membership(&membership(uid, "beta", Expiration::At(past)))
            .unwrap();

        assert_eq!(tx.delete_membership_if(uid, "beta", |m| m.is_active_at(Utc::now())), 0);
        assert_eq!(
            tx.update_membership_if(uid, "beta", Expiration::Never, |m| !m.is_active_at(Utc::now())),
            1
        );
        assert_eq!(tx.membership(uid, "beta").unwrap().expiration, Expiration::Never);
        assert_eq!(tx.delete_membership_if(uid, "beta", |_| true), 1);
        assert_eq!(tx.delete_membership_if(uid, "beta", |_| true), 0);
    }

    #[test]
    fn test_sequences_are_not_reused_after_rollback() {
        let db = Database::new();
        {
            let mut tx = db.begin();
            tx.append_audit(UserId(1), "a", true, Utc::now());
            tx.insert_user("alice", "x").unwrap();
        }
        let mut tx = db.begin();
        let record = tx.append_audit(UserId(1), "a", true, Utc::now());
        let uid = tx.insert_user("alice", "x").unwrap();
        assert_eq!(record.operation_id, 2);
        assert_eq!(uid, UserId(2));
    }

    #[test]
    fn test_audit_window_is_half_open() {
        let db = Database::new();
        let start = Utc::now();
        let end = start + Duration::hours(1);
        let mut tx = db.begin();
        tx.append_audit(UserId(1), "a", true, start);
        tx.append_audit(UserId(1), "a", false, end);
        let records = tx.audit_between(start, end);
        assert_eq!(records.len(), 1);
        assert!(records[0].is_added);
    }
}
