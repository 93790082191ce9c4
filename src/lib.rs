//! cloudpush - Recursive local-to-cloud folder mirroring
//!
//! cloudpush walks a local directory tree and reproduces it in remote storage
//! that is reachable only through the provider's command-line tool. It skips
//! anything that already exists remotely, retries transient failures, and
//! records every outcome.
//!
//! ## Core Features
//!
//! - **Remote Catalog**: One listing per remote folder, cached for the run
//! - **Retrying Runner**: Bounded retries with linear backoff and already-exists detection
//! - **Planner**: Folders before files, each level resolved before descending
//! - **Progress Ledger**: Per-item status, run summary, and a parseable error report
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`exec`]: Process execution with streaming output and timeouts
//! - [`tool`]: Storage CLI invocation and output parsing
//! - [`planner`]: The synchronization engine

pub mod catalog;
pub mod config;
pub mod error;
pub mod exec;
pub mod health;
pub mod ledger;
pub mod planner;
pub mod runner;
pub mod scan;
pub mod shutdown;
pub mod tool;
pub mod tui;

pub use catalog::{FolderListing, RemoteCatalog};
pub use config::Config;
pub use error::{SyncError, ToolError};
pub use exec::{CommandExecutor, CommandOutcome, ProcessExecutor, ToolCommand};
pub use health::HealthCheck;
pub use ledger::{FailedOperation, LedgerSnapshot, ProgressLedger};
pub use planner::{RootMode, RunStatus, SyncPlanner, SyncReport, SyncRequest};
pub use runner::{OperationResult, OperationRunner, RetryPolicy};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
pub use tool::{EntryKind, RemoteEntry, RemoteTool};
