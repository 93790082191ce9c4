//! Common test utilities and helpers for cloudpush tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cloudpush::config::ToolConfig;
use cloudpush::exec::{CommandExecutor, CommandOutcome, ToolCommand, TIMEOUT_EXIT_CODE};
use cloudpush::scan::Scanner;
use cloudpush::{RemoteTool, RetryPolicy, ShutdownSignal, ShutdownTrigger, SyncPlanner, ToolError};

/// Identifier of the folder every fake remote starts with
pub const ROOT: &str = "D";

/// Scripted behavior for one invocation, consumed in order
#[derive(Debug, Clone)]
pub enum Script {
    /// Behave normally; lets a later step target a specific call
    Pass,
    /// Exit non-zero without touching the remote
    Fail(i32, &'static str),
    /// Killed at the deadline without touching the remote
    Timeout,
    /// Perform the operation, then report a failure anyway
    FailAfterApplying(i32),
    /// Report "already exists", making sure the target does exist
    AlreadyExists,
    /// Create a folder but print a confirmation without its identifier
    CreatedWithoutId,
    /// Request shutdown and behave like a killed process
    Interrupt,
}

#[derive(Debug, Default)]
struct FakeFolder {
    folders: BTreeMap<String, String>,
    files: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct FakeState {
    folders: HashMap<String, FakeFolder>,
    next_id: usize,
    log: Vec<ToolCommand>,
    scripts: HashMap<String, VecDeque<Script>>,
    unavailable: bool,
}

/// In-memory stand-in for the storage CLI
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
    trigger: Mutex<Option<ShutdownTrigger>>,
}

fn arg<'a>(command: &'a ToolCommand, flag: &str) -> &'a str {
    command
        .args
        .iter()
        .find_map(|arg| arg.strip_prefix(flag))
        .unwrap_or_default()
}

fn outcome(exit_code: i32, output: impl Into<String>) -> CommandOutcome {
    let output = output.into();
    CommandOutcome {
        exit_code,
        already_exists: output.to_lowercase().contains("already exists"),
        output,
        timed_out: false,
    }
}

impl FakeState {
    fn new_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }

    fn ensure_folder(&mut self, parent: &str, name: &str) -> Option<String> {
        if let Some(id) = self.folders.get(parent)?.folders.get(name) {
            return Some(id.clone());
        }
        let id = self.new_id("f");
        self.folders.insert(id.clone(), FakeFolder::default());
        self.folders
            .get_mut(parent)?
            .folders
            .insert(name.to_string(), id.clone());
        Some(id)
    }

    fn ensure_file(&mut self, folder: &str, name: &str) -> bool {
        if !self.folders.contains_key(folder) {
            return false;
        }
        let id = self.new_id("u");
        if let Some(entry) = self.folders.get_mut(folder) {
            entry.files.entry(name.to_string()).or_insert(id);
        }
        true
    }
}

impl FakeRemote {
    /// A remote with one empty folder, [`ROOT`]
    pub fn new() -> Arc<Self> {
        let remote = Self::default();
        remote
            .state
            .lock()
            .unwrap()
            .folders
            .insert(ROOT.to_string(), FakeFolder::default());
        Arc::new(remote)
    }

    /// Make the availability probe fail as if the tool were not installed
    pub fn set_unavailable(&self) {
        self.state.lock().unwrap().unavailable = true;
    }

    /// Trigger used by [`Script::Interrupt`]
    pub fn set_trigger(&self, trigger: ShutdownTrigger) {
        *self.trigger.lock().unwrap() = Some(trigger);
    }

    /// Queue behaviors for `key`: `version`, `list:<id>`, `create-folder:<name>`
    /// or `upload:<file name>`
    pub fn script(&self, key: &str, steps: Vec<Script>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(key.to_string())
            .or_default()
            .extend(steps);
    }

    /// Seed a remote folder; returns its id
    pub fn add_folder(&self, parent: &str, name: &str) -> String {
        self.state
            .lock()
            .unwrap()
            .ensure_folder(parent, name)
            .expect("parent folder exists")
    }

    /// Seed a remote file
    pub fn add_file(&self, folder: &str, name: &str) {
        assert!(self.state.lock().unwrap().ensure_file(folder, name));
    }

    pub fn commands(&self) -> Vec<ToolCommand> {
        self.state.lock().unwrap().log.clone()
    }

    /// Number of invocations of `subcommand`
    pub fn count(&self, subcommand: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.subcommand() == Some(subcommand))
            .count()
    }

    /// Number of uploads of a file named `name`
    pub fn uploads_of(&self, name: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.subcommand() == Some("upload"))
            .filter(|c| Path::new(arg(c, "--file=")).file_name() == Some(OsStr::new(name)))
            .count()
    }

    /// Compact trace like `create-folder:sub`, `upload:a.txt`, `list:D`
    pub fn trace(&self) -> Vec<String> {
        self.commands()
            .iter()
            .filter_map(|c| match c.subcommand()? {
                "list" => Some(format!("list:{}", arg(c, "--id="))),
                "create-folder" => Some(format!("create-folder:{}", arg(c, "--name="))),
                "upload" => Some(format!(
                    "upload:{}",
                    Path::new(arg(c, "--file="))
                        .file_name()?
                        .to_string_lossy()
                )),
                _ => None,
            })
            .collect()
    }

    /// Every remote path below `folder`, folders with a trailing `/`, sorted
    pub fn tree(&self, folder: &str) -> Vec<String> {
        fn walk(state: &FakeState, id: &str, prefix: &str, out: &mut Vec<String>) {
            let Some(folder) = state.folders.get(id) else {
                return;
            };
            for (name, child) in &folder.folders {
                out.push(format!("{}{}/", prefix, name));
                walk(state, child, &format!("{}{}/", prefix, name), out);
            }
            for name in folder.files.keys() {
                out.push(format!("{}{}", prefix, name));
            }
        }

        let state = self.state.lock().unwrap();
        let mut out = Vec::new();
        walk(&state, folder, "", &mut out);
        out.sort();
        out
    }

    fn respond(&self, command: &ToolCommand) -> Result<CommandOutcome, ToolError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(command.clone());

        let subcommand = command.subcommand().unwrap_or_default().to_string();
        if subcommand == "--version" && state.unavailable {
            return Err(ToolError::Spawn {
                program: command.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            });
        }

        let id = arg(command, "--id=").to_string();
        let name = match subcommand.as_str() {
            "create-folder" => arg(command, "--name=").to_string(),
            "upload" => Path::new(arg(command, "--file="))
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            _ => String::new(),
        };
        let key = match subcommand.as_str() {
            "--version" => "version".to_string(),
            "list" => format!("list:{}", id),
            _ => format!("{}:{}", subcommand, name),
        };
        let script = state.scripts.get_mut(&key).and_then(VecDeque::pop_front);

        match script {
            Some(Script::Fail(code, message)) => {
                return Ok(outcome(code, format!("{}\n", message)))
            }
            Some(Script::Timeout) => {
                return Ok(CommandOutcome {
                    exit_code: TIMEOUT_EXIT_CODE,
                    already_exists: false,
                    output: "uploading... 10%\n".to_string(),
                    timed_out: true,
                })
            }
            Some(Script::Interrupt) => {
                drop(state);
                if let Some(trigger) = self.trigger.lock().unwrap().as_ref() {
                    trigger.trigger();
                }
                return Err(ToolError::Interrupted {
                    command: command.to_string(),
                });
            }
            Some(Script::FailAfterApplying(code)) => {
                match subcommand.as_str() {
                    "create-folder" => {
                        state.ensure_folder(&id, &name);
                    }
                    "upload" => {
                        state.ensure_file(&id, &name);
                    }
                    _ => {}
                }
                return Ok(outcome(code, "Error: connection reset\n"));
            }
            Some(Script::AlreadyExists) => {
                match subcommand.as_str() {
                    "create-folder" => {
                        state.ensure_folder(&id, &name);
                    }
                    "upload" => {
                        state.ensure_file(&id, &name);
                    }
                    _ => {}
                }
                return Ok(outcome(1, "Error: item already exists\n"));
            }
            Some(Script::CreatedWithoutId) => {
                state.ensure_folder(&id, &name);
                return Ok(outcome(0, "Folder created successfully\n"));
            }
            Some(Script::Pass) | None => {}
        }

        match subcommand.as_str() {
            "--version" => Ok(outcome(0, "fake-cli/1.0 test\n")),
            "list" => {
                let Some(folder) = state.folders.get(&id) else {
                    return Ok(outcome(1, format!("Error: folder {} not found\n", id)));
                };
                let mut out = String::from("Type Name Id\n");
                for (name, child) in &folder.folders {
                    out.push_str(&format!("folder {} {}\n", name, child));
                }
                for (name, file_id) in &folder.files {
                    out.push_str(&format!("file {} {}\n", name, file_id));
                }
                Ok(outcome(0, out))
            }
            "create-folder" => {
                let exists = state
                    .folders
                    .get(&id)
                    .map(|f| f.folders.contains_key(&name));
                match exists {
                    None => Ok(outcome(1, "Error: parent not found\n")),
                    Some(true) => Ok(outcome(2, "Error: Folder already exists\n")),
                    Some(false) => {
                        let new_id = state.ensure_folder(&id, &name).unwrap_or_default();
                        let link = format!("https://drive.example.com/folder/{}", new_id);
                        Ok(outcome(
                            0,
                            format!("Folder created successfully, view it at {}\n", link),
                        ))
                    }
                }
            }
            "upload" => {
                let exists = state.folders.get(&id).map(|f| f.files.contains_key(&name));
                match exists {
                    None => Ok(outcome(1, "Error: folder not found\n")),
                    Some(true) => Ok(outcome(2, "Error: File already exists\n")),
                    Some(false) => {
                        state.ensure_file(&id, &name);
                        Ok(outcome(0, "File uploaded\n"))
                    }
                }
            }
            other => Ok(outcome(1, format!("unknown command {}\n", other))),
        }
    }
}

#[async_trait]
impl CommandExecutor for FakeRemote {
    async fn execute(&self, command: &ToolCommand) -> Result<CommandOutcome, ToolError> {
        self.respond(command)
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(600))
    }
}

/// A planner wired to `remote` with immediate retries
pub fn planner(
    remote: &Arc<FakeRemote>,
    max_attempts: u32,
    shutdown: ShutdownSignal,
) -> SyncPlanner {
    let tool = Arc::new(RemoteTool::new(ToolConfig::default(), remote.clone()));
    SyncPlanner::new(
        tool,
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
        },
        Scanner::default(),
        shutdown,
    )
}
