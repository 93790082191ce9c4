//! Progress ledger - status of every item and every failed operation
//!
//! The engine is the only writer. Presentation gets cloned
//! [`LedgerSnapshot`]s through a watch channel and never sees the ledger
//! itself.
//!
//! Error report format, one record per failed operation:
//!
//! ```text
//! [2026-10-17T09:30:00.000000000Z] upload-file
//! path: /home/me/photos/a.jpg
//! command: internxt upload --id=abc '--file=/home/me/photos/a.jpg'
//! error:
//!   | exit code 1
//!   | network unreachable
//! ```
//!
//! `path` and `command` escape `\`, newline and carriage return. Every line
//! of the error text is kept verbatim after the `  | ` prefix.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub type ItemId = usize;

/// Minimum spacing between published snapshots, unless flushed
const PUBLISH_INTERVAL: Duration = Duration::from_millis(50);

const REPORT_HEADER: &str = "# cloudpush error report";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemKind {
    Folder,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemStatus {
    Pending,
    InProgress,
    Completed,
    AlreadyExists,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::AlreadyExists | Self::Failed)
    }

    pub const ALL: [ItemStatus; 5] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::AlreadyExists,
        Self::Failed,
    ];
}

/// Whether an item came from the local tree or only from a remote listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
    Local,
    RemoteOnly,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Folder => "folder",
            Self::File => "file",
        })
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::AlreadyExists => "already exists",
            Self::Failed => "failed",
        })
    }
}

/// One local path under synchronization, or a remote-only name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub path: PathBuf,
    pub kind: ItemKind,
    pub status: ItemStatus,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub origin: Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CreateFolder,
    UploadFile,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateFolder => "create-folder",
            Self::UploadFile => "upload-file",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create-folder" => Ok(Self::CreateFolder),
            "upload-file" => Ok(Self::UploadFile),
            other => bail!("unknown operation kind: {}", other),
        }
    }
}

/// A remote-affecting operation that ended in permanent failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedOperation {
    pub kind: OperationKind,
    pub path: PathBuf,
    /// The command as it would be typed into a shell
    pub command: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Item counts by kind, origin and status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    counts: BTreeMap<(ItemKind, Origin, ItemStatus), usize>,
    pub failed_operations: usize,
}

impl Summary {
    pub fn count(&self, kind: ItemKind, origin: Origin, status: ItemStatus) -> usize {
        self.counts
            .get(&(kind, origin, status))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self, kind: ItemKind, origin: Origin) -> usize {
        ItemStatus::ALL
            .iter()
            .map(|status| self.count(kind, origin, *status))
            .sum()
    }

    /// Local items of either kind with `status`
    pub fn local(&self, status: ItemStatus) -> usize {
        self.count(ItemKind::Folder, Origin::Local, status)
            + self.count(ItemKind::File, Origin::Local, status)
    }

    /// Local items that reached a terminal status
    pub fn local_done(&self) -> usize {
        ItemStatus::ALL
            .iter()
            .filter(|status| status.is_terminal())
            .map(|status| self.local(*status))
            .sum()
    }

    pub fn local_total(&self) -> usize {
        self.total(ItemKind::Folder, Origin::Local) + self.total(ItemKind::File, Origin::Local)
    }

    pub fn remote_only(&self) -> usize {
        self.total(ItemKind::Folder, Origin::RemoteOnly)
            + self.total(ItemKind::File, Origin::RemoteOnly)
    }

    pub fn has_failures(&self) -> bool {
        self.failed_operations > 0 || self.local(ItemStatus::Failed) > 0
    }
}

/// Read-only view of the ledger for presentation
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub items: Vec<Item>,
    pub summary: Summary,
    pub current: Option<ItemId>,
    pub finished: bool,
}

struct Publisher {
    sender: watch::Sender<Arc<LedgerSnapshot>>,
    last: Option<Instant>,
}

#[derive(Default)]
pub struct ProgressLedger {
    items: Vec<Item>,
    failures: Vec<FailedOperation>,
    current: Option<ItemId>,
    finished: bool,
    publisher: Option<Publisher>,
}

impl ProgressLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish snapshots to `sender` as the ledger changes
    pub fn publish_to(&mut self, sender: watch::Sender<Arc<LedgerSnapshot>>) {
        self.publisher = Some(Publisher { sender, last: None });
        self.publish(true);
    }

    /// Add a Pending item
    pub fn register(&mut self, path: PathBuf, kind: ItemKind, origin: Origin) -> ItemId {
        self.register_with_status(path, kind, origin, ItemStatus::Pending)
    }

    pub fn register_with_status(
        &mut self,
        path: PathBuf,
        kind: ItemKind,
        origin: Origin,
        status: ItemStatus,
    ) -> ItemId {
        let id = self.items.len();
        self.items.push(Item {
            path,
            kind,
            status,
            last_error: None,
            completed_at: status.is_terminal().then(Utc::now),
            origin,
        });
        self.publish(false);
        id
    }

    /// Move an item to `status`. Terminal statuses stamp the completion time.
    pub fn record(&mut self, id: ItemId, status: ItemStatus, error: Option<String>) {
        let Some(item) = self.items.get_mut(id) else {
            warn!("Ignoring status update for unknown item {}", id);
            return;
        };

        debug!("{} {}: {}", item.kind, item.path.display(), status);
        item.status = status;
        if error.is_some() {
            item.last_error = error;
        }
        item.completed_at = status.is_terminal().then(Utc::now);

        if status == ItemStatus::InProgress {
            if let Some(previous) = self.current.filter(|&previous| previous != id) {
                if let Some(stale) = self.items.get_mut(previous) {
                    if stale.status == ItemStatus::InProgress {
                        warn!("{} was still in progress", stale.path.display());
                        stale.status = ItemStatus::Pending;
                    }
                }
            }
            self.current = Some(id);
        } else if self.current == Some(id) {
            self.current = None;
        }
        self.publish(false);
    }

    pub fn append_failure(&mut self, failure: FailedOperation) {
        warn!(
            "{} failed for {}: {}",
            failure.kind,
            failure.path.display(),
            failure.error.lines().next().unwrap_or_default()
        );
        self.failures.push(failure);
        self.publish(false);
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn failures(&self) -> &[FailedOperation] {
        &self.failures
    }

    pub fn current(&self) -> Option<ItemId> {
        self.current
    }

    /// Counts computed from the current items
    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            counts: BTreeMap::new(),
            failed_operations: self.failures.len(),
        };
        for item in &self.items {
            *summary
                .counts
                .entry((item.kind, item.origin, item.status))
                .or_insert(0) += 1;
        }
        summary
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            items: self.items.clone(),
            summary: self.summary(),
            current: self.current,
            finished: self.finished,
        }
    }

    /// Push the current state to the subscriber now
    pub fn flush(&mut self) {
        self.publish(true);
    }

    /// Mark the run over and publish the final state
    pub fn finish(&mut self) {
        self.finished = true;
        self.current = None;
        self.publish(true);
    }

    fn publish(&mut self, force: bool) {
        let due = match &self.publisher {
            Some(publisher) => {
                force
                    || publisher
                        .last
                        .map_or(true, |last| last.elapsed() >= PUBLISH_INTERVAL)
            }
            None => false,
        };
        if !due {
            return;
        }
        let snapshot = Arc::new(self.snapshot());
        if let Some(publisher) = &mut self.publisher {
            publisher.sender.send_replace(snapshot);
            publisher.last = Some(Instant::now());
        }
    }

    /// Write the error report into `directory`. Nothing is written when there
    /// were no failures.
    pub fn write_error_report(
        &self,
        directory: &Path,
        timestamp: DateTime<Local>,
    ) -> Result<Option<PathBuf>> {
        if self.failures.is_empty() {
            return Ok(None);
        }

        std::fs::create_dir_all(directory).with_context(|| {
            format!("Failed to create report directory: {}", directory.display())
        })?;
        let path = directory.join(report_file_name(timestamp));
        std::fs::write(&path, render_error_report(&self.failures))
            .with_context(|| format!("Failed to write error report: {}", path.display()))?;

        info!(
            "Wrote {} failure(s) to {}",
            self.failures.len(),
            path.display()
        );
        Ok(Some(path))
    }
}

/// `cloudpush-errors-YYYYmmdd-HHMMSS.log`
pub fn report_file_name(timestamp: DateTime<Local>) -> String {
    format!("cloudpush-errors-{}.log", timestamp.format("%Y%m%d-%H%M%S"))
}

pub fn render_error_report(failures: &[FailedOperation]) -> String {
    let mut out = String::new();
    out.push_str(REPORT_HEADER);
    out.push('\n');
    out.push_str(&format!("# failures: {}\n", failures.len()));

    for failure in failures {
        out.push('\n');
        out.push_str(&format!(
            "[{}] {}\n",
            failure
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
            failure.kind
        ));
        out.push_str(&format!(
            "path: {}\n",
            escape(&failure.path.to_string_lossy())
        ));
        out.push_str(&format!("command: {}\n", escape(&failure.command)));
        out.push_str("error:\n");
        for line in failure.error.split('\n') {
            if line.is_empty() {
                out.push_str("  |\n");
            } else {
                out.push_str("  | ");
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

pub fn read_error_report(path: &Path) -> Result<Vec<FailedOperation>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read error report: {}", path.display()))?;
    parse_error_report(&content)
        .with_context(|| format!("Malformed error report: {}", path.display()))
}

pub fn parse_error_report(content: &str) -> Result<Vec<FailedOperation>> {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut failures = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.is_empty() || line.starts_with('#') {
            i += 1;
            continue;
        }

        let lineno = i + 1;
        let header = line
            .strip_prefix('[')
            .and_then(|rest| rest.split_once("] "))
            .with_context(|| format!("line {}: expected record header", lineno))?;
        let timestamp = DateTime::parse_from_rfc3339(header.0)
            .with_context(|| format!("line {}: bad timestamp", lineno))?
            .with_timezone(&Utc);
        let kind: OperationKind = header.1.parse()?;

        let field = |index: usize, name: &str| -> Result<String> {
            lines
                .get(index)
                .and_then(|line| line.strip_prefix(name))
                .map(unescape)
                .with_context(|| format!("line {}: expected `{}`", index + 1, name.trim()))
        };
        let path = field(i + 1, "path: ")?;
        let command = field(i + 2, "command: ")?;
        if lines.get(i + 3) != Some(&"error:") {
            bail!("line {}: expected `error:`", i + 4);
        }

        i += 4;
        let mut error_lines = Vec::new();
        while let Some(rest) = lines.get(i).and_then(|line| line.strip_prefix("  |")) {
            error_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
            i += 1;
        }
        if error_lines.is_empty() {
            bail!("line {}: missing error text", i + 1);
        }

        failures.push(FailedOperation {
            kind,
            path: PathBuf::from(path),
            command,
            error: error_lines.join("\n"),
            timestamp,
        });
    }

    Ok(failures)
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
