//! Minimal user directory so memberships have users to reference.

use crate::repo::UserRepo;
use cohort_core::{ResultExt, SegmentError, SegmentResult, UserId};
use std::sync::Arc;
use tracing::info;

const MAX_NAME_LEN: usize = 100;

pub struct UserDirectory {
    repo: Arc<dyn UserRepo>,
}

impl UserDirectory {
    pub fn new(repo: Arc<dyn UserRepo>) -> Self {
        Self { repo }
    }

    /// `credential` is stored as given; hash it before calling.
    pub fn create_user(&self, name: &str, credential: &str) -> SegmentResult<UserId> {
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(SegmentError::validation(format!(
                "name must be 1..={MAX_NAME_LEN} characters"
            ))
            .context("users.create"));
        }
        let id = self.repo.insert_user(name, credential).op("users.create")?;
        info!(user_id = %id, "User created");
        Ok(id)
    }
}
