use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned to a user by storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId(id)
    }
}

/// A named cohort. The slug is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Opaque to this crate; whoever creates the user decides the encoding.
    pub credential: String,
}

/// When a membership stops counting as current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum Expiration {
    At(DateTime<Utc>),
    Never,
}

impl Expiration {
    /// `now + ttl_days` when that lands strictly after `now`, otherwise
    /// `Never`. A TTL of zero or less therefore makes the membership permanent.
    pub fn from_ttl(now: DateTime<Utc>, ttl_days: i64) -> Self {
        match Duration::try_days(ttl_days).and_then(|ttl| now.checked_add_signed(ttl)) {
            Some(expires) if expires > now => Expiration::At(expires),
            _ => Expiration::Never,
        }
    }

    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        match self {
            Expiration::At(expires) => *expires > at,
            Expiration::Never => true,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Expiration::At(expires) => Some(*expires),
            Expiration::Never => None,
        }
    }
}

/// Association between a user and a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: UserId,
    pub segment_slug: String,
    pub expiration: Expiration,
}

impl Membership {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.expiration.is_active_at(at)
    }
}

/// One line item of an add request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentTtl {
    pub slug: String,
    #[serde(default)]
    pub ttl_days: i64,
}

impl SegmentTtl {
    pub fn new(slug: impl Into<String>, ttl_days: i64) -> Self {
        Self {
            slug: slug.into(),
            ttl_days,
        }
    }
}

/// Immutable audit log entry describing one membership mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub operation_id: u64,
    pub user_id: UserId,
    pub segment_slug: String,
    pub is_added: bool,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_positive_ttl_is_finite() {
        let now = Utc.with_ymd_and_hms(2023, 8, 1, 12, 0, 0).unwrap();
        let exp = Expiration::from_ttl(now, 7);
        assert_eq!(exp, Expiration::At(now + Duration::days(7)));
        assert!(exp.is_active_at(now + Duration::days(6)));
        assert!(!exp.is_active_at(now + Duration::days(7)));
    }

    #[test]
    fn test_non_positive_ttl_never_expires() {
        let now = Utc::now();
        assert_eq!(Expiration::from_ttl(now, 0), Expiration::Never);
        assert_eq!(Expiration::from_ttl(now, -3), Expiration::Never);
        assert_eq!(Expiration::from_ttl(now, i64::MIN), Expiration::Never);
        assert!(Expiration::Never.is_active_at(now + Duration::days(365 * 100)));
        assert_eq!(Expiration::Never.expires_at(), None);
    }

    #[test]
    fn test_expiration_serde_is_tagged() {
        let json = serde_json::to_value(Expiration::Never).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "never" }));
    }
}
