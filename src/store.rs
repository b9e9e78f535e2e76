use crate::backup::{parse_backup, validate_restore};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AppSettings, BackupDocument, CreateMemoPayload, ExportResponse, Folder, FolderDeletion, Memo, RestorePayload,
    RestoreSummary, UpdateMemoPayload,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DATABASE_FILE: &str = "notes.sqlite";

/// Async entry point for every folder and memo operation. Each call runs the
/// matching synchronous database operation on the blocking pool.
#[derive(Clone)]
pub struct NoteStore {
    db: Arc<Database>,
    data_dir: PathBuf,
}

impl NoteStore {
    pub fn new(data_dir: PathBuf) -> AppResult<Self> {
        let db_path = data_dir.join(DATABASE_FILE);
        let db = Arc::new(Database::new(&db_path)?);
        tracing::info!(path = %db.path().display(), "note store opened");
        Ok(Self { db, data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    async fn with_db<T, F>(&self, operation: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> AppResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || operation(db.as_ref())).await?
    }

    // ─── Folders ────────────────────────────────────────────────────────────

    pub async fn list_folders(&self) -> AppResult<Vec<Folder>> {
        self.with_db(|db| db.list_folders()).await
    }

    /// Folders ordered by their latest activity, newest first.
    pub async fn list_folders_by_activity(&self) -> AppResult<Vec<Folder>> {
        self.with_db(|db| db.list_folders_by_activity()).await
    }

    pub async fn get_folder(&self, id: &str) -> AppResult<Option<Folder>> {
        let id = id.to_string();
        self.with_db(move |db| db.get_folder(&id)).await
    }

    pub async fn create_folder(&self, name: &str) -> AppResult<Folder> {
        let name = name.to_string();
        self.with_db(move |db| db.create_folder(&name)).await
    }

    pub async fn rename_folder(&self, id: &str, name: &str) -> AppResult<Folder> {
        let id = id.to_string();
        let name = name.to_string();
        self.with_db(move |db| db.rename_folder(&id, &name)).await
    }

    pub async fn touch_folder(&self, id: &str) -> AppResult<bool> {
        let id = id.to_string();
        self.with_db(move |db| db.touch_folder(&id)).await
    }

    pub async fn delete_folder(&self, id: &str) -> AppResult<FolderDeletion> {
        let id = id.to_string();
        self.with_db(move |db| db.delete_folder(&id)).await
    }

    /// Caller-side fallback for memos saved without an explicit folder.
    /// `create_memo` never does this on its own.
    pub async fn resolve_uncategorized_folder(&self) -> AppResult<Folder> {
        let settings = self.get_settings().await?;
        let existing = self
            .list_folders()
            .await?
            .into_iter()
            .find(|folder| folder.name == settings.uncategorized_folder_name);
        match existing {
            Some(folder) => Ok(folder),
            None => {
                tracing::info!(name = %settings.uncategorized_folder_name, "creating uncategorized folder");
                self.create_folder(&settings.uncategorized_folder_name).await
            }
        }
    }

    // ─── Memos ──────────────────────────────────────────────────────────────

    pub async fn list_memos(&self) -> AppResult<Vec<Memo>> {
        self.with_db(|db| db.list_memos()).await
    }

    pub async fn list_memos_by_folder(&self, folder_id: &str) -> AppResult<Vec<Memo>> {
        let folder_id = folder_id.to_string();
        self.with_db(move |db| db.list_memos_by_folder(&folder_id)).await
    }

    pub async fn get_memo(&self, id: &str) -> AppResult<Option<Memo>> {
        let id = id.to_string();
        self.with_db(move |db| db.get_memo(&id)).await
    }

    pub async fn create_memo(&self, payload: CreateMemoPayload) -> AppResult<Memo> {
        self.with_db(move |db| db.create_memo(&payload)).await
    }

    pub async fn update_memo(&self, id: &str, update: UpdateMemoPayload) -> AppResult<Memo> {
        let id = id.to_string();
        self.with_db(move |db| db.update_memo(&id, &update)).await
    }

    pub async fn delete_memo(&self, id: &str) -> AppResult<bool> {
        let id = id.to_string();
        self.with_db(move |db| db.delete_memo(&id)).await
    }

    pub async fn search_memos(&self, query: &str) -> AppResult<Vec<Memo>> {
        let query = query.to_string();
        self.with_db(move |db| db.search_memos(&query)).await
    }

    // ─── Backup ─────────────────────────────────────────────────────────────

    pub async fn export_all(&self) -> AppResult<BackupDocument> {
        self.with_db(|db| db.export_all()).await
    }

    pub async fn import_all(&self, payload: RestorePayload) -> AppResult<RestoreSummary> {
        validate_restore(&payload)?;
        self.with_db(move |db| db.import_all(&payload)).await
    }

    pub async fn clear_all(&self) -> AppResult<()> {
        self.with_db(|db| db.clear_all()).await
    }

    /// Writes the export document as pretty JSON. Without an explicit path
    /// the file goes to the configured backup directory.
    pub async fn export_to_file(&self, path: Option<&Path>) -> AppResult<ExportResponse> {
        let document = self.export_all().await?;
        let output_path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let settings = self.get_settings().await?;
                let backup_dir = settings
                    .backup_dir
                    .map(PathBuf::from)
                    .unwrap_or_else(|| self.data_dir.join("backups"));
                let stamp = document.exported_at.format("%Y%m%dT%H%M%S%.3fZ");
                backup_dir.join(format!("memos-backup-{}.json", stamp))
            }
        };

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| AppError::Io(error.to_string()))?;
        }
        let contents = serde_json::to_string_pretty(&document)?;
        tokio::fs::write(&output_path, contents)
            .await
            .map_err(|error| AppError::Io(error.to_string()))?;

        tracing::info!(
            path = %output_path.display(),
            folders = document.folders.len(),
            memos = document.memos.len(),
            "backup exported"
        );
        Ok(ExportResponse {
            path: output_path.to_string_lossy().to_string(),
        })
    }

    /// Reads and validates a backup file, then overwrites the store with it.
    /// A file that fails validation leaves the store untouched.
    pub async fn import_from_file(&self, path: &Path) -> AppResult<RestoreSummary> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|error| AppError::Io(format!("{}: {}", path.display(), error)))?;
        let payload = parse_backup(&raw)?;
        self.import_all(payload).await
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub async fn get_settings(&self) -> AppResult<AppSettings> {
        self.with_db(|db| db.get_settings()).await
    }

    pub async fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        self.with_db(move |db| db.update_settings(update)).await
    }
}

#[cfg(test)]
mod tests {
    use super::NoteStore;
    use crate::errors::AppError;
    use crate::models::{CreateMemoPayload, UpdateMemoPayload};

    #[tokio::test]
    async fn uncategorized_resolution_reuses_existing_folder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = NoteStore::new(dir.path().to_path_buf()).expect("store");

        let seeded = store.resolve_uncategorized_folder().await.expect("resolve");
        let again = store.resolve_uncategorized_folder().await.expect("resolve again");
        assert_eq!(seeded.id, again.id);
        assert_eq!(store.list_folders().await.expect("folders").len(), 1);

        store.clear_all().await.expect("clear");
        let recreated = store.resolve_uncategorized_folder().await.expect("recreate");
        assert_ne!(recreated.id, seeded.id);
        assert_eq!(recreated.name, "Uncategorized");
    }

    #[tokio::test]
    async fn uncategorized_name_follows_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = NoteStore::new(dir.path().to_path_buf()).expect("store");
        store
            .update_settings(serde_json::json!({ "uncategorizedFolderName": "Inbox" }))
            .await
            .expect("update settings");

        let folder = store.resolve_uncategorized_folder().await.expect("resolve");
        assert_eq!(folder.name, "Inbox");
    }

    #[tokio::test]
    async fn folders_by_activity_puts_latest_memo_folder_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = NoteStore::new(dir.path().to_path_buf()).expect("store");
        let older = store.create_folder("Older").await.expect("create");
        let newer = store.create_folder("Newer").await.expect("create");
        store
            .create_memo(CreateMemoPayload {
                folder_id: older.id.clone(),
                title: Some("ping".to_string()),
                content: None,
            })
            .await
            .expect("create memo");

        let ordered = store.list_folders_by_activity().await.expect("ordered");
        assert_eq!(ordered[0].id, older.id);
        assert_eq!(ordered[1].id, newer.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_memo_creation_keeps_folder_ahead_of_newest_memo() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = NoteStore::new(dir.path().to_path_buf()).expect("store");
        let folder = store.create_folder("Busy").await.expect("create");

        for round in 0..50 {
            let mut handles = Vec::new();
            for writer in 0..8 {
                let store = store.clone();
                let folder_id = folder.id.clone();
                handles.push(tokio::spawn(async move {
                    store
                        .create_memo(CreateMemoPayload {
                            folder_id,
                            title: Some(format!("round {round} writer {writer}")),
                            content: None,
                        })
                        .await
                }));
            }
            let mut newest: Option<String> = None;
            for handle in handles {
                let memo = handle.await.expect("join").expect("create memo");
                newest = newest.max(memo.created_at);
            }

            let current = store.get_folder(&folder.id).await.expect("get").expect("exists");
            assert!(current.updated_at >= newest, "round {round}: {:?} < {:?}", current.updated_at, newest);
        }
    }

    #[tokio::test]
    async fn export_file_round_trips_through_import() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = NoteStore::new(dir.path().to_path_buf()).expect("store");
        let folder = store.create_folder("Work").await.expect("create");
        let memo = store
            .create_memo(CreateMemoPayload {
                folder_id: folder.id.clone(),
                title: Some("Plan".to_string()),
                content: Some("buy milk".to_string()),
            })
            .await
            .expect("create memo");

        let exported = store.export_to_file(None).await.expect("export");
        assert!(exported.path.contains("backups"));
        let before = store.export_all().await.expect("snapshot");

        store
            .update_memo(
                &memo.id,
                UpdateMemoPayload {
                    content: Some("changed".to_string()),
                    ..UpdateMemoPayload::default()
                },
            )
            .await
            .expect("update");
        store.create_folder("Extra").await.expect("extra");

        let summary = store
            .import_from_file(std::path::Path::new(&exported.path))
            .await
            .expect("import");
        assert_eq!(summary.memos, 1);

        let after = store.export_all().await.expect("snapshot after");
        assert_eq!(after.folders, before.folders);
        assert_eq!(after.memos, before.memos);
    }

    #[tokio::test]
    async fn invalid_backup_file_does_not_touch_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = NoteStore::new(dir.path().to_path_buf()).expect("store");
        store.create_folder("Keep me").await.expect("create");
        let before = store.export_all().await.expect("snapshot");

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{ "folders": [] }"#).expect("write bad backup");
        let error = store.import_from_file(&bad).await.expect_err("rejected");
        assert!(matches!(error, AppError::InvalidInput(_)));

        let missing = store
            .import_from_file(&dir.path().join("missing.json"))
            .await
            .expect_err("missing file");
        assert!(matches!(missing, AppError::Io(_)));

        let after = store.export_all().await.expect("snapshot after");
        assert_eq!(after.folders, before.folders);
    }
}
