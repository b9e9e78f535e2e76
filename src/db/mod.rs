use crate::backup::count_orphan_memos;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AppSettings, BackupDocument, CreateMemoPayload, Folder, FolderDeletion, Memo, RestorePayload, RestoreSummary,
    UpdateMemoPayload,
};
use crate::search::search_memos;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const APP_SETTINGS_KEY: &str = "app";
const SEED_MARKER_KEY: &str = "first_run_seeded";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    clock: Mutex<Option<DateTime<Utc>>>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            clock: Mutex::new(None),
            db_path: path.to_path_buf(),
        };

        db.ensure_default_settings()?;
        db.seed_default_folder()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connection(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    /// Strictly increasing within this handle, even when the wall clock stalls.
    /// Writers call this while holding the connection guard, so stamps reach
    /// the table in the order they were issued.
    fn next_timestamp(&self) -> AppResult<DateTime<Utc>> {
        let mut last = self
            .clock
            .lock()
            .map_err(|_| AppError::Internal("clock mutex poisoned".to_string()))?;
        let now = Utc::now();
        let stamp = match *last {
            Some(previous) if now <= previous => previous + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        Ok(stamp)
    }

    // ─── Folders ────────────────────────────────────────────────────────────

    pub fn list_folders(&self) -> AppResult<Vec<Folder>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, updated_at FROM folders ORDER BY created_sort ASC, id ASC",
        )?;
        let folders = stmt
            .query_map([], parse_folder_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(folders)
    }

    /// Latest activity first; equal stamps fall back to id, descending.
    pub fn list_folders_by_activity(&self) -> AppResult<Vec<Folder>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, updated_at FROM folders ORDER BY updated_sort DESC, id DESC",
        )?;
        let folders = stmt
            .query_map([], parse_folder_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(folders)
    }

    pub fn get_folder(&self, id: &str) -> AppResult<Option<Folder>> {
        let conn = self.connection()?;
        select_folder(&conn, id).map_err(AppError::from)
    }

    pub fn create_folder(&self, name: &str) -> AppResult<Folder> {
        ensure_folder_name(name)?;
        let conn = self.connection()?;
        let now = format_time(&self.next_timestamp()?);
        let folder = Folder {
            id: new_record_id(),
            name: name.to_string(),
            created_at: Some(now.clone()),
            updated_at: Some(now),
        };
        insert_folder(&conn, &folder)?;
        tracing::debug!(folder_id = %folder.id, "folder created");
        Ok(folder)
    }

    pub fn rename_folder(&self, id: &str, name: &str) -> AppResult<Folder> {
        ensure_folder_name(name)?;
        let conn = self.connection()?;
        let now = format_time(&self.next_timestamp()?);
        let changed = conn.execute(
            "UPDATE folders SET name = ?1, updated_at = ?2, updated_sort = ?2 WHERE id = ?3",
            params![name, now, id],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("Folder {} not found", id)));
        }
        tracing::debug!(folder_id = %id, "folder renamed");
        select_folder(&conn, id)?.ok_or_else(|| AppError::NotFound(format!("Folder {} not found", id)))
    }

    /// Returns whether a folder row was stamped.
    pub fn touch_folder(&self, id: &str) -> AppResult<bool> {
        let conn = self.connection()?;
        let now = format_time(&self.next_timestamp()?);
        Ok(touch_folder_at(&conn, id, &now)?)
    }

    pub fn delete_folder(&self, id: &str) -> AppResult<FolderDeletion> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let memos_deleted = tx.execute("DELETE FROM memos WHERE folder_id = ?1", [id])?;
        let folder_deleted = tx.execute("DELETE FROM folders WHERE id = ?1", [id])? > 0;
        tx.commit()?;

        tracing::info!(folder_id = %id, folder_deleted, memos_deleted, "folder deleted");
        Ok(FolderDeletion {
            folder_deleted,
            memos_deleted,
        })
    }

    // ─── Memos ──────────────────────────────────────────────────────────────

    pub fn list_memos(&self) -> AppResult<Vec<Memo>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, folder_id, title, content, created_at, updated_at
             FROM memos ORDER BY updated_sort DESC, id DESC",
        )?;
        let memos = stmt
            .query_map([], parse_memo_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(memos)
    }

    pub fn list_memos_by_folder(&self, folder_id: &str) -> AppResult<Vec<Memo>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, folder_id, title, content, created_at, updated_at
             FROM memos WHERE folder_id = ?1 ORDER BY updated_sort DESC, id DESC",
        )?;
        let memos = stmt
            .query_map([folder_id], parse_memo_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(memos)
    }

    pub fn get_memo(&self, id: &str) -> AppResult<Option<Memo>> {
        let conn = self.connection()?;
        select_memo(&conn, id).map_err(AppError::from)
    }

    pub fn create_memo(&self, payload: &CreateMemoPayload) -> AppResult<Memo> {
        ensure_folder_id(&payload.folder_id)?;
        let mut conn = self.connection()?;
        let now = format_time(&self.next_timestamp()?);
        let memo = Memo {
            id: new_record_id(),
            folder_id: payload.folder_id.clone(),
            title: payload.title.clone(),
            content: payload.content.clone(),
            created_at: Some(now.clone()),
            updated_at: Some(now.clone()),
        };

        let tx = conn.transaction()?;
        insert_memo(&tx, &memo)?;
        let touched = touch_folder_at(&tx, &memo.folder_id, &now)?;
        tx.commit()?;

        if !touched {
            tracing::warn!(memo_id = %memo.id, folder_id = %memo.folder_id, "memo created in unknown folder");
        }
        tracing::debug!(memo_id = %memo.id, folder_id = %memo.folder_id, "memo created");
        Ok(memo)
    }

    /// Applies the supplied fields, refreshes `updated_at` and stamps the
    /// folder the memo ends up in.
    pub fn update_memo(&self, id: &str, update: &UpdateMemoPayload) -> AppResult<Memo> {
        if let Some(folder_id) = update.folder_id.as_deref() {
            ensure_folder_id(folder_id)?;
        }

        let mut conn = self.connection()?;
        let now = format_time(&self.next_timestamp()?);
        let tx = conn.transaction()?;
        let mut memo = select_memo(&tx, id)?.ok_or_else(|| AppError::NotFound(format!("Memo {} not found", id)))?;
        if let Some(folder_id) = &update.folder_id {
            memo.folder_id = folder_id.clone();
        }
        if let Some(title) = &update.title {
            memo.title = Some(title.clone());
        }
        if let Some(content) = &update.content {
            memo.content = Some(content.clone());
        }
        memo.updated_at = Some(now.clone());

        tx.execute(
            "UPDATE memos SET folder_id = ?1, title = ?2, content = ?3, updated_at = ?4, updated_sort = ?4
             WHERE id = ?5",
            params![memo.folder_id, memo.title, memo.content, now, id],
        )?;
        let touched = touch_folder_at(&tx, &memo.folder_id, &now)?;
        tx.commit()?;

        if !touched {
            tracing::warn!(memo_id = %id, folder_id = %memo.folder_id, "memo updated in unknown folder");
        }
        tracing::debug!(memo_id = %id, moved = update.folder_id.is_some(), "memo updated");
        Ok(memo)
    }

    /// Deleting an unknown id is not an error.
    pub fn delete_memo(&self, id: &str) -> AppResult<bool> {
        let conn = self.connection()?;
        let changed = conn.execute("DELETE FROM memos WHERE id = ?1", [id])?;
        tracing::debug!(memo_id = %id, deleted = changed > 0, "memo deleted");
        Ok(changed > 0)
    }

    pub fn search_memos(&self, query: &str) -> AppResult<Vec<Memo>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let memos = self.list_memos()?;
        Ok(search_memos(memos, query))
    }

    // ─── Backup ─────────────────────────────────────────────────────────────

    pub fn export_all(&self) -> AppResult<BackupDocument> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let folders = {
            let mut stmt = tx.prepare(
                "SELECT id, name, created_at, updated_at FROM folders ORDER BY created_sort ASC, id ASC",
            )?;
            let rows = stmt.query_map([], parse_folder_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        let memos = {
            let mut stmt = tx.prepare(
                "SELECT id, folder_id, title, content, created_at, updated_at
                 FROM memos ORDER BY created_sort ASC, id ASC",
            )?;
            let rows = stmt.query_map([], parse_memo_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        tx.commit()?;

        Ok(BackupDocument {
            folders,
            memos,
            exported_at: Utc::now(),
        })
    }

    /// Replaces both collections with the payload, ids and timestamp text
    /// kept verbatim. Either everything lands or nothing changes.
    pub fn import_all(&self, payload: &RestorePayload) -> AppResult<RestoreSummary> {
        let orphan_memos = count_orphan_memos(payload);

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM memos", [])?;
        tx.execute("DELETE FROM folders", [])?;
        for folder in &payload.folders {
            insert_folder(&tx, folder)?;
        }
        for memo in &payload.memos {
            insert_memo(&tx, memo)?;
        }
        tx.commit()?;

        if orphan_memos > 0 {
            tracing::warn!(orphan_memos, "restored memos reference folders missing from the backup");
        }
        tracing::info!(
            folders = payload.folders.len(),
            memos = payload.memos.len(),
            "store restored from backup"
        );
        Ok(RestoreSummary {
            folders: payload.folders.len(),
            memos: payload.memos.len(),
            orphan_memos,
        })
    }

    pub fn clear_all(&self) -> AppResult<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let memos = tx.execute("DELETE FROM memos", [])?;
        let folders = tx.execute("DELETE FROM folders", [])?;
        tx.commit()?;
        tracing::info!(folders, memos, "store cleared");
        Ok(())
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        let conn = self.connection()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                [APP_SETTINGS_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<AppSettings>(&raw).unwrap_or_default()),
            None => Ok(AppSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: AppSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::InvalidInput(format!("invalid settings: {}", error)))?;
        if settings.uncategorized_folder_name.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "uncategorizedFolderName must not be empty".to_string(),
            ));
        }

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![APP_SETTINGS_KEY, serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(1) FROM settings WHERE key = ?1",
            [APP_SETTINGS_KEY],
            |row| row.get(0),
        )?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES (?1, ?2, ?3)",
                params![
                    APP_SETTINGS_KEY,
                    serde_json::to_string(&AppSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }

    /// Runs once per database file; a later reset does not bring the folder back.
    fn seed_default_folder(&self) -> AppResult<()> {
        let settings = self.get_settings()?;

        let mut conn = self.connection()?;
        let now = format_time(&self.next_timestamp()?);
        let tx = conn.transaction()?;
        let seeded: bool = tx.query_row(
            "SELECT COUNT(1) > 0 FROM settings WHERE key = ?1",
            [SEED_MARKER_KEY],
            |row| row.get(0),
        )?;
        if seeded {
            return Ok(());
        }

        let folder_count: i64 = tx.query_row("SELECT COUNT(1) FROM folders", [], |row| row.get(0))?;
        if settings.seed_default_folder && folder_count == 0 {
            let folder = Folder {
                id: new_record_id(),
                name: settings.uncategorized_folder_name.clone(),
                created_at: Some(now.clone()),
                updated_at: Some(now.clone()),
            };
            insert_folder(&tx, &folder)?;
            tracing::info!(folder_id = %folder.id, name = %folder.name, "seeded default folder");
        }
        tx.execute(
            "INSERT INTO settings (key, value_json, updated_at) VALUES (?1, 'true', ?2)",
            params![SEED_MARKER_KEY, now],
        )?;
        tx.commit()?;
        Ok(())
    }
}

pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fixed-width UTC form, so text order in SQLite equals time order.
pub fn format_time(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Ordering key for stored timestamp text, folded into UTC. A bare date
/// counts as midnight. Missing or unreadable text sorts before any real time.
pub fn sort_key(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return String::new();
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return format_time(&parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok().or_else(|| {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    });
    naive
        .map(|naive| format_time(&Utc.from_utc_datetime(&naive)))
        .unwrap_or_default()
}

fn ensure_folder_name(name: &str) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::InvalidInput("folder name must not be empty".to_string()));
    }
    Ok(())
}

fn ensure_folder_id(folder_id: &str) -> AppResult<()> {
    if folder_id.trim().is_empty() {
        return Err(AppError::InvalidInput("memo requires a folder id".to_string()));
    }
    Ok(())
}

fn select_folder(conn: &Connection, id: &str) -> rusqlite::Result<Option<Folder>> {
    conn.query_row(
        "SELECT id, name, created_at, updated_at FROM folders WHERE id = ?1",
        [id],
        parse_folder_row,
    )
    .optional()
}

fn select_memo(conn: &Connection, id: &str) -> rusqlite::Result<Option<Memo>> {
    conn.query_row(
        "SELECT id, folder_id, title, content, created_at, updated_at FROM memos WHERE id = ?1",
        [id],
        parse_memo_row,
    )
    .optional()
}

fn insert_folder(conn: &Connection, folder: &Folder) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO folders (id, name, created_at, updated_at, created_sort, updated_sort)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            folder.id,
            folder.name,
            folder.created_at,
            folder.updated_at,
            sort_key(folder.created_at.as_deref()),
            sort_key(folder.updated_at.as_deref())
        ],
    )?;
    Ok(())
}

fn insert_memo(conn: &Connection, memo: &Memo) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO memos (id, folder_id, title, content, created_at, updated_at, created_sort, updated_sort)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            memo.id,
            memo.folder_id,
            memo.title,
            memo.content,
            memo.created_at,
            memo.updated_at,
            sort_key(memo.created_at.as_deref()),
            sort_key(memo.updated_at.as_deref())
        ],
    )?;
    Ok(())
}

/// `at` must already be in `format_time` form.
fn touch_folder_at(conn: &Connection, id: &str, at: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE folders SET updated_at = ?1, updated_sort = ?1 WHERE id = ?2",
        params![at, id],
    )?;
    Ok(changed > 0)
}

fn parse_folder_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn parse_memo_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memo> {
    Ok(Memo {
        id: row.get(0)?,
        folder_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
