//! Sync planner - walks the local tree and reproduces it remotely
//!
//! Every item moves `Pending -> InProgress -> {Completed | AlreadyExists |
//! Failed}`. Within a directory all subfolders are resolved (recursively,
//! depth-first) before any of its files, so a folder's files are only ever
//! uploaded into a folder that is known to exist. A folder that cannot be
//! created, or whose listing fails, takes its subtree out of the run without
//! stopping its siblings.

use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::catalog::RemoteCatalog;
use crate::config::Config;
use crate::error::{SyncError, ToolError};
use crate::exec::{ProcessExecutor, ToolCommand};
use crate::ledger::{
    FailedOperation, Item, ItemId, ItemKind, ItemStatus, LedgerSnapshot, OperationKind, Origin,
    ProgressLedger, Summary,
};
use crate::runner::{OperationResult, OperationRunner, RetryPolicy};
use crate::scan::{LocalDir, LocalFile, LocalSource, Scanner};
use crate::shutdown::ShutdownSignal;
use crate::tool::RemoteTool;

/// Exit code for an interrupted run, as a shell reports SIGINT
pub const INTERRUPTED_EXIT_CODE: u8 = 130;

/// Where a directory source lands in the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootMode {
    /// Create a remote folder named after the local root and sync beneath it
    Wrap,
    /// Merge the root's contents directly into the destination
    Merge,
}

impl RootMode {
    /// A trailing path separator asks for merge mode, like `rsync src/ dst`
    pub fn from_path_hint(path: &Path, merge: bool) -> Self {
        let trailing = path
            .as_os_str()
            .to_string_lossy()
            .chars()
            .last()
            .map_or(false, std::path::is_separator);
        if merge || trailing {
            Self::Merge
        } else {
            Self::Wrap
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub source: PathBuf,
    /// Remote folder identifier to sync into
    pub destination: String,
    pub root_mode: RootMode,
    /// Where the error report goes; `None` skips writing it
    pub report_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Finished,
    Interrupted,
}

/// Outcome of a whole run
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub status: RunStatus,
    pub summary: Summary,
    pub items: Vec<Item>,
    pub failures: Vec<FailedOperation>,
    pub report_path: Option<PathBuf>,
    pub remote_queries: usize,
    pub duration: Duration,
    pub finished_at: DateTime<Local>,
}

impl SyncReport {
    /// 0 when everything is in place, 130 when interrupted, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        if self.status == RunStatus::Interrupted {
            return INTERRUPTED_EXIT_CODE;
        }
        let incomplete =
            self.summary.local(ItemStatus::Pending) + self.summary.local(ItemStatus::InProgress);
        if self.summary.has_failures() || incomplete > 0 {
            1
        } else {
            0
        }
    }
}

struct PlannedFile {
    id: ItemId,
    path: PathBuf,
    name: String,
}

/// Children of a directory, with their ledger ids
struct PlannedContents {
    path: PathBuf,
    dirs: Vec<PlannedDir>,
    files: Vec<PlannedFile>,
}

struct PlannedDir {
    id: ItemId,
    name: String,
    read_error: Option<String>,
    contents: PlannedContents,
}

impl PlannedContents {
    fn collect_ids(&self, out: &mut Vec<ItemId>) {
        for dir in &self.dirs {
            out.push(dir.id);
            dir.contents.collect_ids(out);
        }
        out.extend(self.files.iter().map(|file| file.id));
    }
}

enum Plan {
    Wrap(PlannedDir),
    Merge(PlannedContents),
    File(PlannedFile),
}

type Traversal<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

pub struct SyncPlanner {
    tool: Arc<RemoteTool>,
    catalog: RemoteCatalog,
    runner: OperationRunner,
    ledger: ProgressLedger,
    scanner: Scanner,
    shutdown: ShutdownSignal,
    interrupted: bool,
}

impl SyncPlanner {
    pub fn new(
        tool: Arc<RemoteTool>,
        policy: RetryPolicy,
        scanner: Scanner,
        shutdown: ShutdownSignal,
    ) -> Self {
        let runner = OperationRunner::new(
            tool.executor(),
            policy,
            tool.already_exists_exit_code(),
            shutdown.clone(),
        );
        Self {
            catalog: RemoteCatalog::new(Arc::clone(&tool)),
            tool,
            runner,
            ledger: ProgressLedger::new(),
            scanner,
            shutdown,
            interrupted: false,
        }
    }

    /// Build a planner that drives the real tool as configured
    pub fn from_config(config: &Config, shutdown: ShutdownSignal) -> anyhow::Result<Self> {
        let executor = ProcessExecutor::new(
            config.sync.command_timeout(),
            &config.tool.already_exists_pattern,
            shutdown.clone(),
        )
        .context("Invalid tool.already_exists_pattern")?;
        let tool = Arc::new(RemoteTool::new(config.tool.clone(), Arc::new(executor)));
        let scanner =
            Scanner::new(&config.sync.exclude_patterns).context("Invalid exclude pattern")?;
        let policy = RetryPolicy {
            max_attempts: config.sync.max_attempts,
            base_delay: config.sync.retry_base_delay(),
        };
        Ok(Self::new(tool, policy, scanner, shutdown))
    }

    /// Publish ledger snapshots for a progress view
    pub fn with_progress(mut self, sender: watch::Sender<Arc<LedgerSnapshot>>) -> Self {
        self.ledger.publish_to(sender);
        self
    }

    /// Checks that must pass before any remote work: the source exists, the
    /// tool answers its probe, and the local tree can be read.
    pub async fn preflight(&self, source: &Path) -> Result<LocalSource, SyncError> {
        if std::fs::symlink_metadata(source).is_err() {
            return Err(SyncError::PathNotFound(source.to_path_buf()));
        }

        let version = self.tool.probe().await.map_err(|e| match e {
            ToolError::Interrupted { .. } => SyncError::Interrupted,
            other => SyncError::ToolUnavailable(other),
        })?;
        info!("Storage tool: {}", version);

        self.scanner.scan(source)
    }

    /// Run a full synchronization. Only fatal preconditions are errors;
    /// everything else ends up in the report.
    pub async fn run(mut self, request: SyncRequest) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let source = self.preflight(&request.source).await?;

        let plan = self.plan(source, request.root_mode);
        let summary = self.ledger.summary();
        info!(
            "Syncing {} into {}: {} folder(s), {} file(s)",
            request.source.display(),
            request.destination,
            summary.total(ItemKind::Folder, Origin::Local),
            summary.total(ItemKind::File, Origin::Local)
        );

        let destination = request.destination.as_str();
        match &plan {
            Plan::Wrap(root) => self.sync_folder(destination, root).await,
            Plan::Merge(contents) => self.sync_contents(destination, contents).await,
            Plan::File(file) => self.sync_file(destination, file).await,
        }

        let interrupted = self.should_stop();
        if interrupted {
            warn!("Run interrupted");
        }
        self.ledger.finish();

        let finished_at = Local::now();
        let report_path = match &request.report_dir {
            Some(dir) => match self.ledger.write_error_report(dir, finished_at) {
                Ok(path) => path,
                Err(e) => {
                    error!("{:#}", e);
                    None
                }
            },
            None => None,
        };

        let report = SyncReport {
            status: if interrupted {
                RunStatus::Interrupted
            } else {
                RunStatus::Finished
            },
            summary: self.ledger.summary(),
            items: self.ledger.items().to_vec(),
            failures: self.ledger.failures().to_vec(),
            report_path,
            remote_queries: self.catalog.query_count(),
            duration: started.elapsed(),
            finished_at,
        };
        info!(
            "Sync finished in {:.2}s with {} listing queries",
            report.duration.as_secs_f64(),
            report.remote_queries
        );
        Ok(report)
    }

    /// Register every local item as Pending, in processing order
    fn plan(&mut self, source: LocalSource, mode: RootMode) -> Plan {
        match source {
            LocalSource::File(file) => Plan::File(self.plan_file(file)),
            LocalSource::Directory(root) => match mode {
                RootMode::Wrap => Plan::Wrap(self.plan_dir(root)),
                RootMode::Merge => {
                    Plan::Merge(self.plan_contents(root.path, root.dirs, root.files))
                }
            },
        }
    }

    fn plan_dir(&mut self, dir: LocalDir) -> PlannedDir {
        let id = self
            .ledger
            .register(dir.path.clone(), ItemKind::Folder, Origin::Local);
        PlannedDir {
            id,
            name: dir.name,
            read_error: dir.read_error,
            contents: self.plan_contents(dir.path, dir.dirs, dir.files),
        }
    }

    fn plan_contents(
        &mut self,
        path: PathBuf,
        dirs: Vec<LocalDir>,
        files: Vec<LocalFile>,
    ) -> PlannedContents {
        let dirs = dirs.into_iter().map(|dir| self.plan_dir(dir)).collect();
        let files = files.into_iter().map(|file| self.plan_file(file)).collect();
        PlannedContents { path, dirs, files }
    }

    fn plan_file(&mut self, file: LocalFile) -> PlannedFile {
        let id = self
            .ledger
            .register(file.path.clone(), ItemKind::File, Origin::Local);
        PlannedFile {
            id,
            path: file.path,
            name: file.name,
        }
    }

    fn should_stop(&mut self) -> bool {
        if !self.interrupted && self.shutdown.is_triggered() {
            info!("Interrupt requested, stopping traversal");
            self.interrupted = true;
        }
        self.interrupted
    }

    /// Notes an interrupt carried by `error`; returns whether it was one
    fn caught_interrupt(&mut self, error: &ToolError) -> bool {
        let interrupt = matches!(error, ToolError::Interrupted { .. });
        if interrupt {
            info!("Interrupted during a remote query, stopping traversal");
            self.interrupted = true;
        }
        interrupt
    }

    fn requeue(&mut self, id: ItemId) {
        self.ledger
            .record(id, ItemStatus::Pending, Some("interrupted".to_string()));
    }

    /// Resolve one folder remotely (existing, created, or failed), then its contents
    async fn sync_folder(&mut self, parent_id: &str, dir: &PlannedDir) {
        if self.should_stop() {
            return;
        }

        if let Some(reason) = &dir.read_error {
            self.ledger.record(
                dir.id,
                ItemStatus::Failed,
                Some(format!("cannot read directory: {}", reason)),
            );
            return;
        }

        self.ledger.record(dir.id, ItemStatus::InProgress, None);

        let existing = match self.catalog.folder_id(parent_id, &dir.name).await {
            Ok(existing) => existing,
            Err(e) if self.caught_interrupt(&e) => {
                self.requeue(dir.id);
                return;
            }
            Err(e) => {
                warn!("Skipping {}: {}", dir.contents.path.display(), e);
                self.ledger
                    .record(dir.id, ItemStatus::Pending, Some(e.to_string()));
                return;
            }
        };

        let folder_id = match existing {
            Some(folder_id) => {
                debug!("Folder exists: {}", dir.contents.path.display());
                self.ledger.record(dir.id, ItemStatus::AlreadyExists, None);
                folder_id
            }
            None => match self.create_folder(parent_id, dir).await {
                Some(folder_id) => folder_id,
                None => return,
            },
        };

        self.sync_contents(&folder_id, &dir.contents).await;
    }

    /// Create `dir` under `parent_id`; returns its remote id when it ends up existing
    async fn create_folder(&mut self, parent_id: &str, dir: &PlannedDir) -> Option<String> {
        let command = self.tool.create_folder_command(parent_id, &dir.name);
        info!("Creating folder {}", dir.contents.path.display());
        self.ledger.flush();

        let path = dir.contents.path.as_path();
        let report = match self.runner.run(&command).await {
            Ok(report) => report,
            Err(e) => {
                self.abandon(dir.id, path, OperationKind::CreateFolder, &command, e);
                return None;
            }
        };

        let (found_status, missing_error) = match report.result {
            OperationResult::Succeeded { output } => {
                if let Some(new_id) = self.tool.parse_created_folder_id(&output) {
                    self.catalog
                        .record_created_folder(parent_id, &dir.name, &new_id);
                    self.ledger.record(dir.id, ItemStatus::Completed, None);
                    return Some(new_id);
                }
                warn!(
                    "No folder id in create-folder output for {}, re-listing parent",
                    path.display()
                );
                let error = format!(
                    "folder created but its id could not be determined\n{}",
                    output.trim_end()
                );
                (ItemStatus::Completed, error)
            }
            OperationResult::AlreadyExists => (
                ItemStatus::AlreadyExists,
                "tool reported the folder already exists, but it is not in the parent listing"
                    .to_string(),
            ),
            OperationResult::Exhausted { error, .. } => (ItemStatus::AlreadyExists, error),
        };

        match self.lookup_folder(parent_id, &dir.name).await {
            Ok(Some(folder_id)) => {
                debug!("Found {} after create-folder", path.display());
                self.ledger.record(dir.id, found_status, None);
                Some(folder_id)
            }
            Ok(None) => {
                self.fail(dir.id, path, OperationKind::CreateFolder, &command, missing_error);
                None
            }
            Err(e) => {
                self.abandon(dir.id, path, OperationKind::CreateFolder, &command, e);
                None
            }
        }
    }

    /// Re-list `parent_id` and look `name` up among its folders. A failed
    /// listing counts as not found; only an interrupt is passed on.
    async fn lookup_folder(
        &mut self,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<String>, ToolError> {
        match self.catalog.reload(parent_id).await {
            Ok(listing) => Ok(listing.folder_id(name).map(str::to_string)),
            Err(e @ ToolError::Interrupted { .. }) => Err(e),
            Err(e) => {
                warn!("Re-check of folder {} failed: {}", parent_id, e);
                Ok(None)
            }
        }
    }

    /// Re-list `folder_id` and check whether `name` is among its files
    async fn lookup_file(&mut self, folder_id: &str, name: &str) -> Result<bool, ToolError> {
        match self.catalog.reload(folder_id).await {
            Ok(listing) => Ok(listing.has_file(name)),
            Err(e @ ToolError::Interrupted { .. }) => Err(e),
            Err(e) => {
                warn!("Re-check of folder {} failed: {}", folder_id, e);
                Ok(false)
            }
        }
    }

    /// Sync the children of a directory that exists remotely as `folder_id`
    fn sync_contents<'a>(
        &'a mut self,
        folder_id: &'a str,
        contents: &'a PlannedContents,
    ) -> Traversal<'a> {
        Box::pin(async move {
            if self.should_stop() {
                return;
            }

            let loaded = self.catalog.ensure_loaded(folder_id).await.map(|_| ());
            if let Err(e) = loaded {
                if self.caught_interrupt(&e) {
                    return;
                }
                warn!("Skipping contents of {}: {}", contents.path.display(), e);
                let mut ids = Vec::new();
                contents.collect_ids(&mut ids);
                let reason = format!("skipped: {}", e);
                for id in ids {
                    self.ledger
                        .record(id, ItemStatus::Pending, Some(reason.clone()));
                }
                return;
            }
            self.discover_remote_only(folder_id, contents);

            for dir in &contents.dirs {
                if self.should_stop() {
                    return;
                }
                self.sync_folder(folder_id, dir).await;
            }

            for file in &contents.files {
                if self.should_stop() {
                    return;
                }
                self.sync_file(folder_id, file).await;
            }
        })
    }

    /// Register names in a loaded listing that have no local counterpart
    fn discover_remote_only(&mut self, folder_id: &str, contents: &PlannedContents) {
        let Some(listing) = self.catalog.listing(folder_id) else {
            return;
        };

        let mut remote_only: Vec<(String, ItemKind)> = listing
            .folder_names()
            .filter(|name| !contents.dirs.iter().any(|dir| dir.name == *name))
            .map(|name| (name.to_string(), ItemKind::Folder))
            .chain(
                listing
                    .file_names()
                    .filter(|name| !contents.files.iter().any(|file| file.name == *name))
                    .map(|name| (name.to_string(), ItemKind::File)),
            )
            .filter(|(name, _)| !self.scanner.is_excluded(name))
            .collect();
        remote_only.sort();

        for (name, kind) in remote_only {
            debug!("Remote only: {} {}", kind, name);
            self.ledger.register_with_status(
                contents.path.join(&name),
                kind,
                Origin::RemoteOnly,
                ItemStatus::AlreadyExists,
            );
        }
    }

    async fn sync_file(&mut self, folder_id: &str, file: &PlannedFile) {
        if self.should_stop() {
            return;
        }

        self.ledger.record(file.id, ItemStatus::InProgress, None);

        match self.catalog.file_exists(folder_id, &file.name).await {
            Ok(true) => {
                debug!("File exists: {}", file.path.display());
                self.ledger.record(file.id, ItemStatus::AlreadyExists, None);
                return;
            }
            Ok(false) => {}
            Err(e) if self.caught_interrupt(&e) => {
                self.requeue(file.id);
                return;
            }
            Err(e) => {
                warn!("Skipping {}: {}", file.path.display(), e);
                self.ledger
                    .record(file.id, ItemStatus::Pending, Some(e.to_string()));
                return;
            }
        }

        let command = self.tool.upload_command(folder_id, &file.path);
        info!("Uploading {}", file.path.display());
        self.ledger.flush();

        let report = match self.runner.run(&command).await {
            Ok(report) => report,
            Err(e) => {
                self.abandon(file.id, &file.path, OperationKind::UploadFile, &command, e);
                return;
            }
        };

        match report.result {
            OperationResult::Succeeded { .. } => {
                self.catalog.record_uploaded_file(folder_id, &file.name);
                self.ledger.record(file.id, ItemStatus::Completed, None);
            }
            OperationResult::AlreadyExists => {
                self.catalog.record_uploaded_file(folder_id, &file.name);
                self.ledger.record(file.id, ItemStatus::AlreadyExists, None);
            }
            OperationResult::Exhausted { error, .. } => {
                match self.lookup_file(folder_id, &file.name).await {
                    Ok(true) => {
                        info!(
                            "File appeared despite failed attempts: {}",
                            file.path.display()
                        );
                        self.ledger.record(file.id, ItemStatus::AlreadyExists, None);
                    }
                    Ok(false) => {
                        self.fail(file.id, &file.path, OperationKind::UploadFile, &command, error)
                    }
                    Err(e) => {
                        self.abandon(file.id, &file.path, OperationKind::UploadFile, &command, e)
                    }
                }
            }
        }
    }

    /// Mark an item Failed and log the operation for the error report
    fn fail(
        &mut self,
        id: ItemId,
        path: &Path,
        kind: OperationKind,
        command: &ToolCommand,
        error: String,
    ) {
        self.ledger.record(id, ItemStatus::Failed, Some(error.clone()));
        self.ledger.append_failure(FailedOperation {
            kind,
            path: path.to_path_buf(),
            command: command.to_string(),
            error,
            timestamp: Utc::now(),
        });
    }

    /// The runner gave up without a verdict. An interrupt puts the item back
    /// to Pending; anything else is a failure.
    fn abandon(
        &mut self,
        id: ItemId,
        path: &Path,
        kind: OperationKind,
        command: &ToolCommand,
        error: ToolError,
    ) {
        if self.caught_interrupt(&error) {
            self.requeue(id);
        } else {
            self.fail(id, path, kind, command, error.to_string());
        }
    }
}
