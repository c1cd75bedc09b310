//! Audit history — month-windowed reads over the append-only audit log.
//!
//! Records are written by the store inside the same transaction as the
//! membership mutation they describe; this module only reads them.

use crate::repo::AuditRepo;
use chrono::{DateTime, TimeZone, Utc};
use cohort_core::{AuditRecord, ResultExt, SegmentError, SegmentResult};
use std::sync::Arc;
use tracing::debug;

/// `[first instant of month, first instant of next month)` in UTC.
pub fn month_window(year: i32, month: u32) -> SegmentResult<(DateTime<Utc>, DateTime<Utc>)> {
    if !(1..=9999).contains(&year) {
        return Err(SegmentError::validation(format!(
            "year must be within 1..=9999, got {year}"
        )));
    }
    if !(1..=12).contains(&month) {
        return Err(SegmentError::validation(format!(
            "month must be within 1..=12, got {month}"
        )));
    }
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let start = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single();
    let end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single();
    match (start, end) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(SegmentError::Internal(format!(
            "unrepresentable month {year}-{month}"
        ))),
    }
}

pub struct AuditHistory {
    repo: Arc<dyn AuditRepo>,
}

impl AuditHistory {
    pub fn new(repo: Arc<dyn AuditRepo>) -> Self {
        Self { repo }
    }

    /// Every record timestamped within the month, ascending by operation id.
    pub fn history_for_month(&self, year: i32, month: u32) -> SegmentResult<Vec<AuditRecord>> {
        let op = "audit.history_for_month";
        let (from, to) = month_window(year, month).op(op)?;
        let records = self.repo.records_between(from, to).op(op)?;
        debug!(year, month, records = records.len(), "Loaded audit history");
        Ok(records)
    }
}
