//! System health checks for cloudpush
//!
//! Backs the `doctor` command: verifies the storage tool answers, the
//! configuration loads, and the places cloudpush writes to are writable.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::exec::ProcessExecutor;
use crate::shutdown::ShutdownSignal;
use crate::tool::RemoteTool;
use crate::Config;

/// Probe timeout; a tool that takes longer than this to print its version is not healthy
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Storage tool availability
    pub tool: CheckResult,
    /// Configuration file status
    pub config: CheckResult,
    /// Error report directory status
    pub report_dir: CheckResult,
    /// Log file location (warning only, not required)
    pub log_file: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks. `config_path` is the file `config` came from.
    pub async fn run(config: &Config, config_path: &Path) -> Self {
        Self {
            tool: Self::check_tool(config).await,
            config: Self::check_config(config_path),
            report_dir: Self::check_report_dir(config),
            log_file: Self::check_log_file(config),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.tool.passed && self.config.passed && self.report_dir.passed
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        [&self.tool, &self.config, &self.report_dir, &self.log_file]
            .into_iter()
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        [&self.tool, &self.config, &self.report_dir, &self.log_file]
            .into_iter()
            .filter(|r| r.is_warning)
            .collect()
    }

    /// Check the storage tool answers its version probe
    async fn check_tool(config: &Config) -> CheckResult {
        let executor = match ProcessExecutor::new(
            PROBE_TIMEOUT,
            &config.tool.already_exists_pattern,
            ShutdownSignal::never(),
        ) {
            Ok(executor) => executor,
            Err(e) => {
                return CheckResult::error_with_details(
                    "Invalid already-exists pattern",
                    e.to_string(),
                )
            }
        };
        let tool = RemoteTool::new(config.tool.clone(), Arc::new(executor));

        match tool.probe().await {
            Ok(version) => CheckResult::ok_with_details(
                format!("{} available", config.tool.program),
                version,
            ),
            Err(e) => CheckResult::error_with_details(
                format!("{} not usable", config.tool.program),
                format!("{}\nInstall it and log in, or set tool.program", e),
            ),
        }
    }

    /// Check the configuration file
    fn check_config(config_path: &Path) -> CheckResult {
        if !config_path.exists() {
            return CheckResult::warning_with_details(
                "No configuration file, using defaults",
                config_path.display().to_string(),
            );
        }
        match Config::load(config_path) {
            Ok(_) => CheckResult::ok_with_details(
                "Configuration valid",
                config_path.display().to_string(),
            ),
            Err(e) => CheckResult::error_with_details("Configuration invalid", format!("{:#}", e)),
        }
    }

    /// Check a configured report directory is writable. Without one, reports
    /// go beside each source and there is nothing to check up front.
    fn check_report_dir(config: &Config) -> CheckResult {
        let Some(dir) = &config.report.directory else {
            return CheckResult::ok("Error reports are written beside the source");
        };
        let path = Path::new(dir);
        if !path.exists() {
            return CheckResult::ok_with_details(
                "Report directory will be created on first failure",
                dir.clone(),
            );
        }
        let probe = path.join(".cloudpush-write-test");
        match std::fs::write(&probe, b"") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
                CheckResult::ok_with_details("Report directory writable", dir.clone())
            }
            Err(e) => CheckResult::error_with_details(
                "Report directory not writable",
                format!("{}: {}", dir, e),
            ),
        }
    }

    /// Check the log file's directory (warning only)
    fn check_log_file(config: &Config) -> CheckResult {
        let path = Path::new(&config.logging.file);
        match path.parent() {
            Some(parent) if parent.exists() => {
                CheckResult::ok_with_details("Log directory exists", config.logging.file.clone())
            }
            Some(parent) => CheckResult::warning_with_details(
                "Log directory not found",
                format!(
                    "It will be created when the progress view starts: {}",
                    parent.display()
                ),
            ),
            None => CheckResult::warning_with_details(
                "Log file has no parent directory",
                config.logging.file.clone(),
            ),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 4] {
        [
            ("Storage Tool", &self.tool),
            ("Configuration", &self.config),
            ("Report Directory", &self.report_dir),
            ("Log File", &self.log_file),
        ]
    }
}
