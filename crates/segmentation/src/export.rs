//! Export pipeline — serializes a month of audit history to a CSV file.

use crate::audit::{month_window, AuditHistory};
use chrono::SecondsFormat;
use cohort_core::{AuditRecord, ResultExt, SegmentError, SegmentResult};
use serde::Serialize;
use std::borrow::Cow;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::info;

pub const CSV_HEADER: &str = "operation_id,user_id,segment_slug,is_added,date";

const FILE_PREFIX: &str = "user_segments_history-";
const FILE_SUFFIX: &str = ".csv";

/// A written export and where to fetch it from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedFile {
    pub file_name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub link: String,
    pub records: usize,
}

pub fn export_file_name(year: i32, month: u32) -> String {
    format!("{FILE_PREFIX}{year}-{month}{FILE_SUFFIX}")
}

/// True for names produced by [`export_file_name`] and nothing else.
pub fn is_export_file_name(name: &str) -> bool {
    let Some(stem) = name
        .strip_prefix(FILE_PREFIX)
        .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
    else {
        return false;
    };
    match stem.split_once('-') {
        Some((year, month)) => {
            !year.is_empty()
                && !month.is_empty()
                && year.bytes().all(|b| b.is_ascii_digit())
                && month.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Header plus one line per record, in the order given.
pub fn render_csv(records: &[AuditRecord]) -> String {
    let mut csv = String::with_capacity(CSV_HEADER.len() + 1 + records.len() * 64);
    csv.push_str(CSV_HEADER);
    csv.push('\n');
    for record in records {
        csv.push_str(&format!(
            "{},{},{},{},{}\n",
            record.operation_id,
            record.user_id,
            csv_field(&record.segment_slug),
            record.is_added,
            record.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ));
    }
    csv
}

pub struct HistoryExporter {
    dir: PathBuf,
    link_prefix: String,
}

impl HistoryExporter {
    pub fn new(dir: impl Into<PathBuf>, link_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            link_prefix: link_prefix.into(),
        }
    }

    /// Write `records` to `user_segments_history-{year}-{month}.csv`,
    /// replacing any previous export of the same month. Each call writes its
    /// own temp file in the export directory and renames it into place.
    pub fn export_to_file(
        &self,
        records: &[AuditRecord],
        year: i32,
        month: u32,
    ) -> SegmentResult<ExportedFile> {
        let op = "export.to_file";
        month_window(year, month).op(op)?;

        let file_name = export_file_name(year, month);
        let path = self.dir.join(&file_name);
        let io_error =
            |e: std::io::Error| SegmentError::Internal(format!("{}: {e}", path.display()));

        fs::create_dir_all(&self.dir).map_err(io_error).op(op)?;
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(io_error).op(op)?;
        tmp.write_all(render_csv(records).as_bytes())
            .map_err(io_error)
            .op(op)?;
        tmp.persist(&path).map_err(|e| io_error(e.error)).op(op)?;

        let link = format!("{}/{}", self.link_prefix.trim_end_matches('/'), file_name);
        info!(
            file = %path.display(),
            records = records.len(),
            "Audit history exported"
        );
        Ok(ExportedFile {
            file_name,
            path,
            link,
            records: records.len(),
        })
    }

    /// History for the month followed by the export.
    pub fn export_month(
        &self,
        history: &AuditHistory,
        year: i32,
        month: u32,
    ) -> SegmentResult<ExportedFile> {
        let records = history.history_for_month(year, month)?;
        self.export_to_file(&records, year, month)
    }

    /// Path of a previously exported file. `None` for anything that is not an
    /// export file name.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        is_export_file_name(file_name).then(|| self.dir.join(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EngineStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use cohort_core::{ErrorKind, UserId};
    use cohort_storage::Database;
    use std::sync::Arc;

    fn record(operation_id: u64, user: i64, slug: &str, is_added: bool, ts: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            operation_id,
            user_id: UserId(user),
            segment_slug: slug.to_string(),
            is_added,
            timestamp: ts,
        }
    }

    #[test]
    fn test_file_names() {
        assert_eq!(export_file_name(2023, 8), "user_segments_history-2023-8.csv");
        assert!(is_export_file_name("user_segments_history-2023-8.csv"));
        assert!(is_export_file_name("user_segments_history-2023-12.csv"));
        assert!(!is_export_file_name("user_segments_history-2023.csv"));
        assert!(!is_export_file_name("user_segments_history-../x-1.csv"));
        assert!(!is_export_file_name("../user_segments_history-2023-8.csv"));
        assert!(!is_export_file_name("user_segments_history--8.csv"));
    }

    #[test]
    fn test_csv_quotes_only_when_needed() {
        let ts = Utc.with_ymd_and_hms(2023, 8, 2, 9, 30, 0).unwrap();
        let csv = render_csv(&[
            record(1, 7, "beta", true, ts),
            record(2, 7, "a,\"b\"", false, ts),
        ]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "1,7,beta,true,2023-08-02T09:30:00Z");
        assert_eq!(lines[2], "2,7,\"a,\"\"b\"\"\",false,2023-08-02T09:30:00Z");
    }

    #[test]
    fn test_export_month_writes_header_plus_records() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::new());
        let (start, _) = month_window(2023, 8).unwrap();
        let mut written = Vec::new();
        {
            let mut tx = db.begin();
            tx.append_audit(UserId(9), "july", true, start - Duration::days(1));
            for i in 0..5i64 {
                let at = start + Duration::hours(i) + Duration::milliseconds(250);
                written.push(tx.append_audit(UserId(i + 1), "beta", i % 2 == 0, at));
            }
            tx.commit();
        }
        let history = AuditHistory::new(Arc::new(EngineStore::new(db)));
        let exporter = HistoryExporter::new(dir.path().join("history"), "/api/v1/history/files/");

        let exported = exporter.export_month(&history, 2023, 8).unwrap();
        assert_eq!(exported.file_name, "user_segments_history-2023-8.csv");
        assert_eq!(exported.link, "/api/v1/history/files/user_segments_history-2023-8.csv");
        assert_eq!(exported.records, 5);

        let contents = fs::read_to_string(&exported.path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], CSV_HEADER);
        for (line, source) in lines[1..].iter().zip(&written) {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields[0], source.operation_id.to_string());
            assert_eq!(fields[1], source.user_id.to_string());
            assert_eq!(fields[2], source.segment_slug);
            assert_eq!(fields[3], source.is_added.to_string());
            let parsed = DateTime::parse_from_rfc3339(fields[4]).unwrap();
            assert_eq!(parsed.with_timezone(&Utc), source.timestamp);
        }
    }

    #[test]
    fn test_export_is_idempotent_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = HistoryExporter::new(dir.path(), "/files");
        let ts = Utc.with_ymd_and_hms(2023, 8, 2, 9, 30, 0).unwrap();
        let records = vec![record(1, 1, "beta", true, ts)];

        let first = exporter.export_to_file(&records, 2023, 8).unwrap();
        let first_bytes = fs::read(&first.path).unwrap();
        let second = exporter.export_to_file(&records, 2023, 8).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(&second.path).unwrap(), first_bytes);

        let empty = exporter.export_to_file(&[], 2023, 8).unwrap();
        assert_eq!(fs::read_to_string(&empty.path).unwrap(), format!("{CSV_HEADER}\n"));
        assert_eq!(exporter.resolve(&empty.file_name), Some(empty.path));
        assert_eq!(exporter.resolve("../../etc/passwd"), None);
    }

    #[test]
    fn test_concurrent_exports_of_same_month_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Arc::new(HistoryExporter::new(dir.path(), "/files"));
        let ts = Utc.with_ymd_and_hms(2023, 8, 2, 9, 30, 0).unwrap();
        let records = Arc::new(vec![record(1, 1, "beta", true, ts)]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let exporter = exporter.clone();
                let records = records.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| exporter.export_to_file(&records, 2023, 8))
                        .filter(Result::is_err)
                        .count()
                })
            })
            .collect();
        let failures: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(failures, 0);

        let path = dir.path().join(export_file_name(2023, 8));
        assert_eq!(fs::read_to_string(&path).unwrap(), render_csv(&records));
        // no temp files left behind
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_invalid_month_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = HistoryExporter::new(dir.path(), "/files");
        let err = exporter.export_to_file(&[], 2023, 13).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
