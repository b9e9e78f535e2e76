use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamps are RFC 3339 text. Store-written records always carry them;
/// restored records keep whatever text the backup had, including none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memo {
    pub id: String,
    pub folder_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMemoPayload {
    pub folder_id: String,
    pub title: Option<String>,
    pub content: Option<String>,
}

/// Partial memo update. Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMemoPayload {
    pub folder_id: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
}

/// Full snapshot produced by an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    pub folders: Vec<Folder>,
    pub memos: Vec<Memo>,
    pub exported_at: DateTime<Utc>,
}

/// Records accepted by a restore. `exportedAt` is informational and ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePayload {
    pub folders: Vec<Folder>,
    pub memos: Vec<Memo>,
}

impl From<BackupDocument> for RestorePayload {
    fn from(value: BackupDocument) -> Self {
        Self {
            folders: value.folders,
            memos: value.memos,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderDeletion {
    pub folder_deleted: bool,
    pub memos_deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub folders: usize,
    pub memos: usize,
    pub orphan_memos: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub uncategorized_folder_name: String,
    pub seed_default_folder: bool,
    pub backup_dir: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            uncategorized_folder_name: "Uncategorized".to_string(),
            seed_default_folder: true,
            backup_dir: None,
        }
    }
}
