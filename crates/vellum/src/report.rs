//! Publish reports
//!
//! Every resource a publish call considers produces one [`ReportEntry`].
//! Entries are streamed to a [`ReportSink`] as they happen and collected
//! into the [`PublishReport`] returned to the caller.

use crate::entities::ResourceId;
use crate::lock::unpoisoned;
use crate::path::ResourcePath;
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    Published,
    Deleted,
    SkippedLocked,
    SkippedNotOwned,
    /// A new resource whose parent folder is not online yet
    SkippedParentUnpublished,
    Error,
}

impl PublishOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishOutcome::Published => "published",
            PublishOutcome::Deleted => "deleted",
            PublishOutcome::SkippedLocked => "skipped-locked",
            PublishOutcome::SkippedNotOwned => "skipped-not-owned",
            PublishOutcome::SkippedParentUnpublished => "skipped-parent-unpublished",
            PublishOutcome::Error => "error",
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            PublishOutcome::SkippedLocked
                | PublishOutcome::SkippedNotOwned
                | PublishOutcome::SkippedParentUnpublished
        )
    }

    /// Whether the online view changed
    pub fn is_committed(&self) -> bool {
        matches!(self, PublishOutcome::Published | PublishOutcome::Deleted)
    }
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    pub path: ResourcePath,
    pub resource_id: ResourceId,
    pub outcome: PublishOutcome,
    pub detail: Option<String>,
}

/// Result of one publish call
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishReport {
    /// Tag carried by every snapshot this call recorded
    pub tag: u64,
    pub entries: Vec<ReportEntry>,
    pub cancelled: bool,
}

impl PublishReport {
    pub fn new(tag: u64) -> Self {
        Self {
            tag,
            ..Default::default()
        }
    }

    pub fn count(&self, outcome: PublishOutcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }

    pub fn published(&self) -> usize {
        self.count(PublishOutcome::Published)
    }

    pub fn deleted(&self) -> usize {
        self.count(PublishOutcome::Deleted)
    }

    pub fn skipped(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_skip()).count()
    }

    pub fn errors(&self) -> usize {
        self.count(PublishOutcome::Error)
    }

    pub fn entry(&self, path: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.path.as_str() == path)
    }

    pub fn outcome_of(&self, path: &str) -> Option<PublishOutcome> {
        self.entry(path).map(|e| e.outcome)
    }

    /// Paths with the given outcome, in processing order
    pub fn paths(&self, outcome: PublishOutcome) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.outcome == outcome)
            .map(|e| e.path.as_str())
            .collect()
    }
}

/// Receives report entries while a publish runs
pub trait ReportSink: Send + Sync {
    fn append(&self, outcome: PublishOutcome, path: &ResourcePath, detail: Option<&str>);
}

/// Routes entries into `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReport;

impl ReportSink for TracingReport {
    fn append(&self, outcome: PublishOutcome, path: &ResourcePath, detail: Option<&str>) {
        let detail = detail.unwrap_or("");
        if outcome.is_committed() {
            info!(%path, %outcome, "Publish");
        } else if outcome == PublishOutcome::Error {
            error!(%path, %outcome, detail, "Publish");
        } else {
            warn!(%path, %outcome, detail, "Publish");
        }
    }
}

/// Collects entries as formatted lines
#[derive(Debug, Default)]
pub struct MemoryReport {
    lines: Mutex<Vec<String>>,
}

impl MemoryReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        unpoisoned(&self.lines).clone()
    }
}

impl ReportSink for MemoryReport {
    fn append(&self, outcome: PublishOutcome, path: &ResourcePath, detail: Option<&str>) {
        let line = match detail {
            Some(detail) => format!("{} {} ({})", outcome, path, detail),
            None => format!("{} {}", outcome, path),
        };
        unpoisoned(&self.lines).push(line);
    }
}

/// Discards entries
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReport;

impl ReportSink for NullReport {
    fn append(&self, _outcome: PublishOutcome, _path: &ResourcePath, _detail: Option<&str>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, outcome: PublishOutcome) -> ReportEntry {
        ReportEntry {
            path: ResourcePath::parse(path).unwrap(),
            resource_id: ResourceId::new(),
            outcome,
            detail: None,
        }
    }

    #[test]
    fn test_counts() {
        let mut report = PublishReport::new(3);
        report.entries.push(entry("/a", PublishOutcome::Published));
        report.entries.push(entry("/b", PublishOutcome::SkippedLocked));
        report.entries.push(entry("/c", PublishOutcome::SkippedNotOwned));
        report.entries.push(entry("/d", PublishOutcome::Deleted));

        assert_eq!(report.published(), 1);
        assert_eq!(report.deleted(), 1);
        assert_eq!(report.skipped(), 2);
        assert_eq!(report.errors(), 0);
        assert_eq!(report.outcome_of("/b"), Some(PublishOutcome::SkippedLocked));
        assert_eq!(report.outcome_of("/z"), None);
        assert_eq!(report.paths(PublishOutcome::Published), vec!["/a"]);

        let committed: Vec<_> = report
            .entries
            .iter()
            .filter(|e| e.outcome.is_committed())
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(committed, vec!["/a", "/d"]);
    }

    #[test]
    fn test_memory_report_lines() {
        let sink = MemoryReport::new();
        let path = ResourcePath::parse("/a.txt").unwrap();
        sink.append(PublishOutcome::Published, &path, None);
        sink.append(PublishOutcome::SkippedLocked, &path, Some("locked by bob"));

        assert_eq!(
            sink.lines(),
            vec![
                "published /a.txt".to_string(),
                "skipped-locked /a.txt (locked by bob)".to_string()
            ]
        );
    }
}
