//! Segment registry — creates and deletes segment definitions.

use crate::repo::SegmentRepo;
use chrono::Utc;
use cohort_core::{ResultExt, SegmentError, SegmentResult};
use std::sync::Arc;
use tracing::info;

/// Reject empty or overlong slugs before they reach storage.
pub(crate) fn validate_slug(slug: &str, max_len: usize) -> SegmentResult<()> {
    if slug.is_empty() {
        return Err(SegmentError::validation("slug must be provided"));
    }
    if slug.chars().count() > max_len {
        return Err(SegmentError::validation(format!(
            "slug exceeds {max_len} characters"
        )));
    }
    Ok(())
}

pub struct SegmentRegistry {
    repo: Arc<dyn SegmentRepo>,
    max_slug_len: usize,
}

impl SegmentRegistry {
    pub fn new(repo: Arc<dyn SegmentRepo>, max_slug_len: usize) -> Self {
        Self { repo, max_slug_len }
    }

    /// Fails with `SegmentAlreadyExists` when the slug is taken.
    pub fn new_segment(&self, slug: &str) -> SegmentResult<()> {
        validate_slug(slug, self.max_slug_len).op("registry.new_segment")?;
        self.repo.insert_segment(slug).op("registry.new_segment")?;
        info!(slug, "Segment created");
        Ok(())
    }

    /// Fails with `SegmentNotFound` when nothing was deleted. Memberships go
    /// with the segment.
    pub fn delete_segment(&self, slug: &str) -> SegmentResult<()> {
        self.repo
            .delete_segment(slug, Utc::now())
            .op("registry.delete_segment")?;
        info!(slug, "Segment deleted");
        Ok(())
    }
}
