use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for cloudpush
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// External storage tool invocation
    #[serde(default)]
    pub tool: ToolConfig,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Error report settings
    #[serde(default)]
    pub report: ReportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the external storage CLI is invoked.
///
/// Argument templates may contain `{id}`, `{name}` and `{file}` placeholders,
/// each substituted as a whole argument value (no shell is involved).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToolConfig {
    /// Program name or path
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments for `list(folder_id)`
    #[serde(default = "default_list_args")]
    pub list_args: Vec<String>,

    /// Arguments for `create-folder(parent_id, name)`
    #[serde(default = "default_create_folder_args")]
    pub create_folder_args: Vec<String>,

    /// Arguments for `upload(folder_id, file)`
    #[serde(default = "default_upload_args")]
    pub upload_args: Vec<String>,

    /// Arguments for the availability probe
    #[serde(default = "default_version_args")]
    pub version_args: Vec<String>,

    /// Exit code the tool uses to report a name collision
    #[serde(default = "default_already_exists_exit_code")]
    pub already_exists_exit_code: Option<i32>,

    /// Case-insensitive regex matched against each output line
    #[serde(default = "default_already_exists_pattern")]
    pub already_exists_pattern: String,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Attempts per remote-affecting operation
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts in seconds, multiplied by the retry number
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: u64,

    /// Timeout for a single tool invocation in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,

    /// Regexes matched against local file and folder names to skip
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

/// Error report configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ReportConfig {
    /// Directory for error reports (defaults to beside the source path)
    pub directory: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log file used while the progress view owns the terminal
    #[serde(default = "default_log_file")]
    pub file: String,
}

// Default value functions
fn default_program() -> String {
    "internxt".to_string()
}
fn default_list_args() -> Vec<String> {
    vec!["list".to_string(), "--id={id}".to_string()]
}
fn default_create_folder_args() -> Vec<String> {
    vec![
        "create-folder".to_string(),
        "--id={id}".to_string(),
        "--name={name}".to_string(),
    ]
}
fn default_upload_args() -> Vec<String> {
    vec![
        "upload".to_string(),
        "--id={id}".to_string(),
        "--file={file}".to_string(),
    ]
}
fn default_version_args() -> Vec<String> {
    vec!["--version".to_string()]
}
fn default_already_exists_exit_code() -> Option<i32> {
    Some(2)
}
fn default_already_exists_pattern() -> String {
    r"already\s+exists".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    5
}
fn default_command_timeout() -> u64 {
    600
}
fn default_exclude_patterns() -> Vec<String> {
    vec![r"^\.DS_Store$".to_string(), r"^Thumbs\.db$".to_string()]
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_file() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/cloudpush/cloudpush.log", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/cloudpush/cloudpush.log", home)
    } else {
        "/tmp/cloudpush.log".to_string()
    }
}

// Default implementations
impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            list_args: default_list_args(),
            create_folder_args: default_create_folder_args(),
            upload_args: default_upload_args(),
            version_args: default_version_args(),
            already_exists_exit_code: default_already_exists_exit_code(),
            already_exists_pattern: default_already_exists_pattern(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay: default_retry_base_delay(),
            command_timeout: default_command_timeout(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

impl SyncConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay)
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("cloudpush").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.tool.program = shellexpand::full(&self.tool.program)
            .context("Failed to expand tool program path")?
            .into_owned();

        if let Some(dir) = &self.report.directory {
            self.report.directory = Some(
                shellexpand::full(dir)
                    .context("Failed to expand report directory")?
                    .into_owned(),
            );
        }

        self.logging.file = shellexpand::full(&self.logging.file)
            .context("Failed to expand log file path")?
            .into_owned();

        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sync.max_attempts == 0 {
            anyhow::bail!("sync.max_attempts must be at least 1");
        }
        if self.sync.command_timeout == 0 {
            anyhow::bail!("sync.command_timeout must be at least 1 second");
        }
        regex::Regex::new(&format!("(?i){}", self.tool.already_exists_pattern))
            .context("Invalid tool.already_exists_pattern")?;
        for pattern in &self.sync.exclude_patterns {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid exclude pattern: {}", pattern))?;
        }
        Ok(())
    }

    /// Resolve the error report directory for a given source path
    pub fn report_directory(&self, source: &Path) -> PathBuf {
        if let Some(dir) = &self.report.directory {
            return PathBuf::from(dir);
        }
        match source.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    fn setup_test_config_dir() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("cloudpush");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");
        (temp_dir, config_dir)
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.tool.program, "internxt");
        assert_eq!(config.tool.already_exists_exit_code, Some(2));
        assert_eq!(config.sync.max_attempts, 3);
        assert_eq!(config.sync.retry_base_delay, 5);
        assert_eq!(config.sync.command_timeout, 600);
        assert!(config.report.directory.is_none());
        assert_eq!(config.logging.level, "info");
        config.validate().expect("default config should be valid");
    }

    #[test]
    #[serial]
    fn test_expand_paths() {
        env::set_var("TEST_CLOUDPUSH_HOME", "/test/home");

        let mut config = Config::default();
        config.tool.program = "${TEST_CLOUDPUSH_HOME}/bin/internxt".to_string();
        config.report.directory = Some("${TEST_CLOUDPUSH_HOME}/reports".to_string());

        config.expand_paths().expect("Failed to expand paths");

        assert_eq!(config.tool.program, "/test/home/bin/internxt");
        assert_eq!(config.report.directory.as_deref(), Some("/test/home/reports"));

        env::remove_var("TEST_CLOUDPUSH_HOME");
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let nonexistent_path = Path::new("/nonexistent/path/config.yml");
        assert!(Config::load(nonexistent_path).is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let (_temp_dir, config_dir) = setup_test_config_dir();
        let config_path = config_dir.join("config.yml");

        let mut config = Config::default();
        config.tool.program = "/opt/internxt/bin/internxt".to_string();
        config.sync.max_attempts = 5;
        config.report.directory = Some("/var/tmp/reports".to_string());

        config.save(&config_path).expect("Failed to save config");
        let loaded = Config::load(&config_path).expect("Failed to load config");

        assert_eq!(loaded.tool.program, "/opt/internxt/bin/internxt");
        assert_eq!(loaded.sync.max_attempts, 5);
        assert_eq!(loaded.report.directory.as_deref(), Some("/var/tmp/reports"));
    }

    #[test]
    fn test_config_default_path_xdg() {
        let default_path = Config::default_config_path().expect("Failed to get default path");
        assert!(default_path.to_string_lossy().contains("cloudpush"));
        assert!(default_path.to_string_lossy().ends_with("config.yml"));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.sync.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_exclude_pattern() {
        let mut config = Config::default();
        config.sync.exclude_patterns = vec!["(unclosed".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_report_directory_defaults_beside_source() {
        let config = Config::default();
        assert_eq!(
            config.report_directory(Path::new("/home/me/photos")),
            PathBuf::from("/home/me")
        );
        assert_eq!(config.report_directory(Path::new("photos")), PathBuf::from("."));

        let mut config = Config::default();
        config.report.directory = Some("/var/log/cloudpush".to_string());
        assert_eq!(
            config.report_directory(Path::new("/home/me/photos")),
            PathBuf::from("/var/log/cloudpush")
        );
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml_content = r#"
tool:
  program: "/usr/local/bin/internxt"
  already_exists_exit_code: null
  already_exists_pattern: "duplicate"
sync:
  max_attempts: 5
  retry_base_delay: 1
  command_timeout: 30
  exclude_patterns: ["^~"]
report:
  directory: "/tmp/reports"
logging:
  level: "debug"
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.tool.program, "/usr/local/bin/internxt");
        assert_eq!(config.tool.already_exists_exit_code, None);
        assert_eq!(config.tool.already_exists_pattern, "duplicate");
        assert_eq!(config.tool.list_args, default_list_args());
        assert_eq!(config.sync.max_attempts, 5);
        assert_eq!(config.sync.retry_base_delay(), Duration::from_secs(1));
        assert_eq!(config.sync.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.sync.exclude_patterns, vec!["^~".to_string()]);
        assert_eq!(config.report.directory.as_deref(), Some("/tmp/reports"));
        assert_eq!(config.logging.level, "debug");
    }
}
