//! Remote catalog - per-folder cache of what already exists remotely
//!
//! Each remote folder is listed at most once per run (plus explicit reloads),
//! so round-trips to the storage tool grow with the number of folders rather
//! than the number of files. Entries change only through a successful
//! listing or through the `record_*` calls made right after a successful
//! create/upload; there is no time-based invalidation, so changes made by
//! someone else mid-run are not observed.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::ToolError;
use crate::tool::{EntryKind, RemoteEntry, RemoteTool};

/// Children of one remote folder, partitioned by kind. Names are case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderListing {
    /// File name -> identifier (unknown for files uploaded during this run)
    files: HashMap<String, Option<String>>,
    /// Folder name -> identifier
    folders: HashMap<String, String>,
}

impl FolderListing {
    pub fn from_entries(entries: Vec<RemoteEntry>) -> Self {
        let mut listing = Self::default();
        for entry in entries {
            match entry.kind {
                EntryKind::File => {
                    listing.files.insert(entry.name, Some(entry.id));
                }
                EntryKind::Folder => {
                    listing.folders.insert(entry.name, entry.id);
                }
            }
        }
        listing
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn folder_id(&self, name: &str) -> Option<&str> {
        self.folders.get(name).map(String::as_str)
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn folder_names(&self) -> impl Iterator<Item = &str> {
        self.folders.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lazily populated cache of remote folder contents, owned by one engine instance
pub struct RemoteCatalog {
    tool: Arc<RemoteTool>,
    entries: HashMap<String, FolderListing>,
    queries: usize,
}

impl RemoteCatalog {
    pub fn new(tool: Arc<RemoteTool>) -> Self {
        Self {
            tool,
            entries: HashMap::new(),
            queries: 0,
        }
    }

    /// List `folder_id` unless it is already cached.
    ///
    /// A failed listing leaves no entry behind, so a later call queries again.
    pub async fn ensure_loaded(&mut self, folder_id: &str) -> Result<&FolderListing, ToolError> {
        if !self.entries.contains_key(folder_id) {
            let listing = self.query(folder_id).await?;
            self.entries.insert(folder_id.to_string(), listing);
        }
        Ok(&self.entries[folder_id])
    }

    /// Drop any cached entry for `folder_id` and list it again
    pub async fn reload(&mut self, folder_id: &str) -> Result<&FolderListing, ToolError> {
        self.entries.remove(folder_id);
        self.ensure_loaded(folder_id).await
    }

    pub async fn file_exists(&mut self, folder_id: &str, name: &str) -> Result<bool, ToolError> {
        Ok(self.ensure_loaded(folder_id).await?.has_file(name))
    }

    pub async fn folder_id(
        &mut self,
        folder_id: &str,
        name: &str,
    ) -> Result<Option<String>, ToolError> {
        Ok(self
            .ensure_loaded(folder_id)
            .await?
            .folder_id(name)
            .map(str::to_string))
    }

    /// Note a folder created by this run
    pub fn record_created_folder(&mut self, parent_id: &str, name: &str, new_id: &str) {
        match self.entries.get_mut(parent_id) {
            Some(listing) => {
                listing.folders.insert(name.to_string(), new_id.to_string());
            }
            None => debug!(
                "Folder {} not cached, not recording created folder {}",
                parent_id, name
            ),
        }
    }

    /// Note a file uploaded by this run
    pub fn record_uploaded_file(&mut self, folder_id: &str, name: &str) {
        match self.entries.get_mut(folder_id) {
            Some(listing) => {
                listing.files.entry(name.to_string()).or_insert(None);
            }
            None => debug!(
                "Folder {} not cached, not recording uploaded file {}",
                folder_id, name
            ),
        }
    }

    /// Cached listing, if `folder_id` has been loaded
    pub fn listing(&self, folder_id: &str) -> Option<&FolderListing> {
        self.entries.get(folder_id)
    }

    /// Number of listing queries issued so far
    pub fn query_count(&self) -> usize {
        self.queries
    }

    async fn query(&mut self, folder_id: &str) -> Result<FolderListing, ToolError> {
        self.queries += 1;
        let entries = self.tool.list(folder_id).await?;
        Ok(FolderListing::from_entries(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolConfig;
    use crate::exec::{CommandExecutor, CommandOutcome, ToolCommand};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies to `list` with queued outputs; an empty queue means failure
    struct ScriptedLister {
        replies: Mutex<VecDeque<(i32, String)>>,
        calls: Mutex<Vec<ToolCommand>>,
    }

    #[async_trait]
    impl CommandExecutor for ScriptedLister {
        async fn execute(&self, command: &ToolCommand) -> Result<CommandOutcome, ToolError> {
            self.calls.lock().unwrap().push(command.clone());
            let (exit_code, output) = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((1, "no more replies".to_string()));
            Ok(CommandOutcome {
                exit_code,
                already_exists: false,
                output,
                timed_out: false,
            })
        }
    }

    fn catalog(replies: Vec<(i32, &str)>) -> (RemoteCatalog, Arc<ScriptedLister>) {
        let lister = Arc::new(ScriptedLister {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|(code, out)| (code, out.to_string()))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        });
        let tool = Arc::new(RemoteTool::new(ToolConfig::default(), lister.clone()));
        (RemoteCatalog::new(tool), lister)
    }

    #[tokio::test]
    async fn test_one_query_per_folder() {
        let (mut catalog, lister) = catalog(vec![(0, "file a.txt 1\nfolder sub 2\n")]);

        assert!(catalog.file_exists("root", "a.txt").await.unwrap());
        assert!(!catalog.file_exists("root", "A.TXT").await.unwrap());
        assert_eq!(
            catalog.folder_id("root", "sub").await.unwrap(),
            Some("2".to_string())
        );
        assert_eq!(catalog.folder_id("root", "a.txt").await.unwrap(), None);

        assert_eq!(catalog.query_count(), 1);
        assert_eq!(lister.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_listing_leaves_no_entry() {
        let (mut catalog, _) = catalog(vec![(1, "boom"), (0, "file a.txt 1\n")]);

        assert!(catalog.ensure_loaded("root").await.is_err());
        assert!(catalog.listing("root").is_none());

        assert!(catalog.file_exists("root", "a.txt").await.unwrap());
        assert_eq!(catalog.query_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_listing_is_still_an_entry() {
        let (mut catalog, _) = catalog(vec![(0, "")]);
        let listing = catalog.ensure_loaded("root").await.unwrap();
        assert!(listing.is_empty());
        assert!(catalog.listing("root").is_some());
        assert!(!catalog.file_exists("root", "x").await.unwrap());
        assert_eq!(catalog.query_count(), 1);
    }

    #[tokio::test]
    async fn test_records_update_without_requery() {
        let (mut catalog, _) = catalog(vec![(0, "")]);
        catalog.ensure_loaded("root").await.unwrap();

        catalog.record_created_folder("root", "photos", "p-1");
        catalog.record_uploaded_file("root", "a.txt");

        assert_eq!(
            catalog.folder_id("root", "photos").await.unwrap(),
            Some("p-1".to_string())
        );
        assert!(catalog.file_exists("root", "a.txt").await.unwrap());
        assert_eq!(catalog.query_count(), 1);
    }

    #[tokio::test]
    async fn test_record_on_unloaded_folder_is_ignored() {
        let (mut catalog, _) = catalog(vec![]);
        catalog.record_created_folder("nowhere", "x", "1");
        catalog.record_uploaded_file("nowhere", "y");
        assert!(catalog.listing("nowhere").is_none());
    }

    #[tokio::test]
    async fn test_reload_requeries() {
        let (mut catalog, _) = catalog(vec![(0, ""), (0, "file late.txt 9\n")]);
        assert!(!catalog.file_exists("root", "late.txt").await.unwrap());
        assert!(catalog.reload("root").await.unwrap().has_file("late.txt"));
        assert_eq!(catalog.query_count(), 2);
    }
}
