//! Constraint names reported by the engine.
//!
//! Layout:
//! - `segments(slug PRIMARY KEY)`
//! - `users(id PRIMARY KEY, name UNIQUE, credential)`
//! - `memberships(user_id REFERENCES users, segment_slug REFERENCES segments
//!   ON DELETE CASCADE, expiration, PRIMARY KEY(user_id, segment_slug))`
//! - `audit_log(operation_id PRIMARY KEY, user_id, segment_slug, is_added, timestamp)`

pub const SEGMENTS_PKEY: &str = "segments_pkey";
pub const USERS_NAME_KEY: &str = "users_name_key";
pub const MEMBERSHIPS_PKEY: &str = "memberships_pkey";
pub const MEMBERSHIPS_USER_FKEY: &str = "memberships_user_id_fkey";
pub const MEMBERSHIPS_SEGMENT_FKEY: &str = "memberships_segment_slug_fkey";
