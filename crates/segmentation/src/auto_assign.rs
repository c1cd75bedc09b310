//! Auto-assignment — create a segment and enroll a random share of all
//! users in the same transaction.

use crate::registry::validate_slug;
use crate::repo::SegmentRepo;
use chrono::Utc;
use cohort_core::{ResultExt, SegmentError, SegmentResult, UserId};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use tracing::info;

/// `round(percent / 100 * total)`, clamped to `total`.
pub fn target_count(percent: f64, total: usize) -> usize {
    let count = (percent / 100.0 * total as f64).round() as usize;
    count.min(total)
}

pub fn validate_percent(percent: f64) -> SegmentResult<()> {
    if (0.0..=100.0).contains(&percent) {
        Ok(())
    } else {
        Err(SegmentError::validation(format!(
            "percent must be within [0, 100], got {percent}"
        )))
    }
}

pub struct AutoAssigner {
    repo: Arc<dyn SegmentRepo>,
    max_slug_len: usize,
}

impl AutoAssigner {
    pub fn new(repo: Arc<dyn SegmentRepo>, max_slug_len: usize) -> Self {
        Self { repo, max_slug_len }
    }

    pub fn create_segment_with_auto_assign(
        &self,
        slug: &str,
        percent: f64,
    ) -> SegmentResult<Vec<UserId>> {
        self.create_segment_with_auto_assign_using(slug, percent, &mut rand::thread_rng())
    }

    /// Same as [`Self::create_segment_with_auto_assign`] with an explicit
    /// random source. Returns the assigned ids in ascending order.
    pub fn create_segment_with_auto_assign_using<R: Rng + ?Sized>(
        &self,
        slug: &str,
        percent: f64,
        rng: &mut R,
    ) -> SegmentResult<Vec<UserId>> {
        let op = "auto_assign.create";
        validate_percent(percent).op(op)?;
        validate_slug(slug, self.max_slug_len).op(op)?;

        let mut population_size = 0;
        let mut select = |population: &[UserId]| -> Vec<UserId> {
            population_size = population.len();
            let count = target_count(percent, population.len());
            population.choose_multiple(&mut *rng, count).copied().collect()
        };
        let mut assigned = self
            .repo
            .create_segment_with_members(slug, Utc::now(), &mut select)
            .op(op)?;
        assigned.sort_unstable();

        info!(
            slug,
            percent,
            assigned = assigned.len(),
            population = population_size,
            "Segment created with auto-assignment"
        );
        Ok(assigned)
    }
}
