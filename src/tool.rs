//! Adapter for the external storage CLI.
//!
//! Renders the configured argument templates into [`ToolCommand`]s and parses
//! what the tool prints back. Execution itself is delegated to a
//! [`CommandExecutor`], so tests can stand in a fake remote.

use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::config::ToolConfig;
use crate::error::ToolError;
use crate::exec::{CommandExecutor, CommandOutcome, ToolCommand};

/// Kind of a remote child as reported by `list`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// One child of a remote folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    pub kind: EntryKind,
    pub name: String,
    pub id: String,
}

/// The storage tool, as seen by the engine
pub struct RemoteTool {
    config: ToolConfig,
    executor: Arc<dyn CommandExecutor>,
    folder_id_pattern: Regex,
}

impl RemoteTool {
    pub fn new(config: ToolConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            config,
            executor,
            folder_id_pattern: Regex::new(r"folder/([^\s/]+)").expect("static regex"),
        }
    }

    pub fn executor(&self) -> Arc<dyn CommandExecutor> {
        Arc::clone(&self.executor)
    }

    /// Exit code the tool uses for a name collision, if it has one
    pub fn already_exists_exit_code(&self) -> Option<i32> {
        self.config.already_exists_exit_code
    }

    pub fn list_command(&self, folder_id: &str) -> ToolCommand {
        self.render(&self.config.list_args, folder_id, "", "")
    }

    pub fn create_folder_command(&self, parent_id: &str, name: &str) -> ToolCommand {
        self.render(&self.config.create_folder_args, parent_id, name, "")
    }

    pub fn upload_command(&self, folder_id: &str, file: &Path) -> ToolCommand {
        let file = file.to_string_lossy();
        self.render(&self.config.upload_args, folder_id, "", &file)
    }

    pub fn version_command(&self) -> ToolCommand {
        self.render(&self.config.version_args, "", "", "")
    }

    fn render(&self, template: &[String], id: &str, name: &str, file: &str) -> ToolCommand {
        let args = template
            .iter()
            .map(|arg| {
                arg.replace("{id}", id)
                    .replace("{name}", name)
                    .replace("{file}", file)
            })
            .collect();
        ToolCommand::new(self.config.program.clone(), args)
    }

    /// Availability probe. Returns the tool's version text.
    pub async fn probe(&self) -> Result<String, ToolError> {
        let command = self.version_command();
        let outcome = self.executor.execute(&command).await?;
        if !outcome.success() {
            return Err(ToolError::Probe {
                command: command.to_string(),
                exit_code: outcome.exit_code,
                message: outcome.output.trim().to_string(),
            });
        }
        Ok(outcome.output.trim().to_string())
    }

    /// Query the children of a remote folder
    pub async fn list(&self, folder_id: &str) -> Result<Vec<RemoteEntry>, ToolError> {
        let command = self.list_command(folder_id);
        let outcome = self.executor.execute(&command).await?;
        if !outcome.success() {
            return Err(listing_error(folder_id, &outcome, self.executor.timeout()));
        }
        let entries = parse_listing(&outcome.output);
        debug!("Folder {} lists {} entries", folder_id, entries.len());
        Ok(entries)
    }

    /// Extract the new folder's identifier from the `folder/<id>` link that
    /// `create-folder` prints. Anything else is not trusted as an id.
    pub fn parse_created_folder_id(&self, output: &str) -> Option<String> {
        self.folder_id_pattern
            .captures_iter(output)
            .last()
            .map(|captures| captures[1].to_string())
    }
}

fn listing_error(
    folder_id: &str,
    outcome: &CommandOutcome,
    timeout: Option<std::time::Duration>,
) -> ToolError {
    ToolError::Listing {
        folder_id: folder_id.to_string(),
        exit_code: outcome.exit_code,
        message: outcome.error_text(timeout),
    }
}

/// Parse `list` output: one `<kind> <name> <id>` per line.
///
/// The kind is the first token and the id the last; everything between them
/// is the name, so names may contain spaces. Lines that do not fit are
/// headers or noise and are skipped.
pub fn parse_listing(output: &str) -> Vec<RemoteEntry> {
    output.lines().filter_map(parse_listing_line).collect()
}

fn parse_listing_line(line: &str) -> Option<RemoteEntry> {
    let line = line.trim();
    let mut tokens = line.split_whitespace();
    let kind = match tokens.next()? {
        "file" => EntryKind::File,
        "folder" => EntryKind::Folder,
        _ => return None,
    };
    let id = line.split_whitespace().last()?;

    let rest = line
        .strip_prefix(if kind == EntryKind::File { "file" } else { "folder" })?
        .trim_start();
    if rest.len() <= id.len() {
        return None;
    }
    let name = rest[..rest.len() - id.len()].trim_end();
    if name.is_empty() {
        return None;
    }

    Some(RemoteEntry {
        kind,
        name: name.to_string(),
        id: id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        outcome: CommandOutcome,
        seen: Mutex<Vec<ToolCommand>>,
    }

    #[async_trait]
    impl CommandExecutor for Canned {
        async fn execute(&self, command: &ToolCommand) -> Result<CommandOutcome, ToolError> {
            self.seen.lock().unwrap().push(command.clone());
            Ok(self.outcome.clone())
        }
    }

    fn tool_with(exit_code: i32, output: &str) -> (RemoteTool, Arc<Canned>) {
        let canned = Arc::new(Canned {
            outcome: CommandOutcome {
                exit_code,
                already_exists: false,
                output: output.to_string(),
                timed_out: false,
            },
            seen: Mutex::new(Vec::new()),
        });
        (RemoteTool::new(ToolConfig::default(), canned.clone()), canned)
    }

    #[test]
    fn test_command_rendering() {
        let (tool, _) = tool_with(0, "");
        assert_eq!(
            tool.list_command("root-id").args,
            vec!["list", "--id=root-id"]
        );
        assert_eq!(
            tool.create_folder_command("p1", "My Folder").args,
            vec!["create-folder", "--id=p1", "--name=My Folder"]
        );
        assert_eq!(
            tool.upload_command("f1", Path::new("/data/a b.txt")).args,
            vec!["upload", "--id=f1", "--file=/data/a b.txt"]
        );
        assert_eq!(tool.version_command().args, vec!["--version"]);
        assert_eq!(tool.version_command().program, "internxt");
    }

    #[test]
    fn test_parse_listing() {
        let output = "\
Type Name Id
file a.txt 111
folder sub 222
file holiday photo.jpg 333
folder   spaced   dir   444
something else entirely
file 555
";
        let entries = parse_listing(output);
        assert_eq!(
            entries,
            vec![
                RemoteEntry {
                    kind: EntryKind::File,
                    name: "a.txt".to_string(),
                    id: "111".to_string()
                },
                RemoteEntry {
                    kind: EntryKind::Folder,
                    name: "sub".to_string(),
                    id: "222".to_string()
                },
                RemoteEntry {
                    kind: EntryKind::File,
                    name: "holiday photo.jpg".to_string(),
                    id: "333".to_string()
                },
                RemoteEntry {
                    kind: EntryKind::Folder,
                    name: "spaced   dir".to_string(),
                    id: "444".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_parse_listing_is_case_sensitive_on_kind() {
        assert!(parse_listing("File a.txt 1\nFOLDER b 2").is_empty());
    }

    #[test]
    fn test_parse_created_folder_id() {
        let (tool, _) = tool_with(0, "");
        assert_eq!(
            tool.parse_created_folder_id(concat!(
                "Folder created successfully, view it at ",
                "https://drive.internxt.com/folder/9f2c-11aa\n"
            )),
            Some("9f2c-11aa".to_string())
        );
        assert_eq!(tool.parse_created_folder_id("done\n"), None);
    }

    #[test]
    fn test_created_folder_message_without_link_has_no_id() {
        let (tool, _) = tool_with(0, "");
        assert_eq!(tool.parse_created_folder_id("Folder created successfully\n"), None);
        assert_eq!(
            tool.parse_created_folder_id("Folder sub created with id abc123\n"),
            None
        );
    }

    #[tokio::test]
    async fn test_list_failure_is_listing_error() {
        let (tool, canned) = tool_with(1, "Error: not logged in\n");
        let err = tool.list("root").await.unwrap_err();
        match err {
            ToolError::Listing {
                folder_id,
                exit_code,
                message,
            } => {
                assert_eq!(folder_id, "root");
                assert_eq!(exit_code, 1);
                assert!(message.contains("not logged in"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(canned.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_probe() {
        let (tool, _) = tool_with(0, "@internxt/cli/1.5.0 linux-x64 node-v20\n");
        assert_eq!(
            tool.probe().await.unwrap(),
            "@internxt/cli/1.5.0 linux-x64 node-v20"
        );

        let (tool, _) = tool_with(127, "command not found\n");
        assert!(matches!(tool.probe().await, Err(ToolError::Probe { .. })));
    }
}
