use crate::errors::{AppError, AppResult};
use crate::models::RestorePayload;
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::HashSet;

// Only what the tables need to hold a record. Timestamps are stored as
// written, whatever their format, and `exportedAt` is never read.
static BACKUP_SCHEMA_JSON: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["folders", "memos"],
        "properties": {
            "folders": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "name"],
                    "properties": {
                        "id": { "type": "string", "minLength": 1 },
                        "name": { "type": "string" },
                        "createdAt": { "type": ["string", "null"] },
                        "updatedAt": { "type": ["string", "null"] }
                    }
                }
            },
            "memos": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "folderId"],
                    "properties": {
                        "id": { "type": "string", "minLength": 1 },
                        "folderId": { "type": "string" },
                        "title": { "type": ["string", "null"] },
                        "content": { "type": ["string", "null"] },
                        "createdAt": { "type": ["string", "null"] },
                        "updatedAt": { "type": ["string", "null"] }
                    }
                }
            }
        }
    })
});

static BACKUP_SCHEMA: Lazy<JSONSchema> =
    Lazy::new(|| JSONSchema::compile(&BACKUP_SCHEMA_JSON).expect("valid backup schema"));

/// Parses raw backup text. Nothing is persisted here, so a rejected file
/// leaves the store untouched.
pub fn parse_backup(raw: &str) -> AppResult<RestorePayload> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("backup file is empty".to_string()));
    }
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|error| AppError::InvalidInput(format!("backup is not valid JSON: {}", error)))?;
    parse_backup_value(value)
}

pub fn parse_backup_value(value: Value) -> AppResult<RestorePayload> {
    let errors = schema_errors(&value);
    if !errors.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "backup does not match the expected shape: {}",
            errors.join("; ")
        )));
    }

    let payload: RestorePayload = serde_json::from_value(value)
        .map_err(|error| AppError::InvalidInput(format!("backup contains an invalid record: {}", error)))?;

    validate_restore(&payload)?;
    Ok(payload)
}

/// Checks that hold for any restore, whether parsed from a file or built in code.
pub fn validate_restore(payload: &RestorePayload) -> AppResult<()> {
    if payload.folders.iter().any(|folder| folder.id.is_empty()) || payload.memos.iter().any(|memo| memo.id.is_empty()) {
        return Err(AppError::InvalidInput("backup contains a record without an id".to_string()));
    }
    ensure_unique_ids("folder", payload.folders.iter().map(|folder| folder.id.as_str()))?;
    ensure_unique_ids("memo", payload.memos.iter().map(|memo| memo.id.as_str()))
}

/// Memos whose folder is not part of the same payload.
pub fn count_orphan_memos(payload: &RestorePayload) -> usize {
    let folder_ids = payload
        .folders
        .iter()
        .map(|folder| folder.id.as_str())
        .collect::<HashSet<_>>();
    payload
        .memos
        .iter()
        .filter(|memo| !folder_ids.contains(memo.folder_id.as_str()))
        .count()
}

fn schema_errors(value: &Value) -> Vec<String> {
    BACKUP_SCHEMA
        .validate(value)
        .err()
        .map(|errors| {
            errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{}: {}", path, error)
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

fn ensure_unique_ids<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> AppResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(AppError::InvalidInput(format!("duplicate {} id {} in backup", kind, id)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{count_orphan_memos, parse_backup};
    use crate::errors::AppError;

    const VALID: &str = r#"{
        "folders": [
            { "id": "f1", "name": "Work", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-02T00:00:00Z" }
        ],
        "memos": [
            { "id": "m1", "folderId": "f1", "title": "Plan", "content": "buy milk",
              "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-02T00:00:00Z" },
            { "id": "m2", "folderId": "gone", "title": null,
              "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z" }
        ],
        "exportedAt": "2024-01-03T00:00:00Z"
    }"#;

    #[test]
    fn accepts_document_and_preserves_records() {
        let payload = parse_backup(VALID).expect("valid backup");
        assert_eq!(payload.folders.len(), 1);
        assert_eq!(payload.memos.len(), 2);
        assert_eq!(payload.memos[0].content.as_deref(), Some("buy milk"));
        assert!(payload.memos[1].title.is_none());
        assert_eq!(count_orphan_memos(&payload), 1);
    }

    #[test]
    fn exported_at_is_optional() {
        let payload = parse_backup(r#"{ "folders": [], "memos": [] }"#).expect("minimal backup");
        assert!(payload.folders.is_empty());
        assert!(payload.memos.is_empty());
    }

    #[test]
    fn rejects_missing_or_null_collections() {
        for raw in [
            r#"{ "memos": [] }"#,
            r#"{ "folders": [] }"#,
            r#"{ "folders": null, "memos": [] }"#,
            r#"{ "folders": [], "memos": null }"#,
            r#"[]"#,
        ] {
            let error = parse_backup(raw).expect_err("invalid backup");
            assert!(matches!(error, AppError::InvalidInput(_)), "{raw}: {error}");
        }
    }

    #[test]
    fn rejects_non_json_and_empty_text() {
        assert!(matches!(parse_backup("not json"), Err(AppError::InvalidInput(_))));
        assert!(matches!(parse_backup("  "), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn accepts_records_with_any_timestamp_text() {
        let raw = r#"{
            "folders": [
                { "id": "f1", "name": "W" },
                { "id": "f2", "name": "D", "createdAt": "2024-01-01", "updatedAt": null },
                { "id": "f3", "name": "O", "createdAt": "2024-01-01T09:00:00.000+09:00", "updatedAt": "yesterday" }
            ],
            "memos": [ { "id": "m1", "folderId": "f1" } ],
            "exportedAt": 1700000000000
        }"#;
        let payload = parse_backup(raw).expect("lenient backup");
        assert!(payload.folders[0].created_at.is_none());
        assert_eq!(payload.folders[1].created_at.as_deref(), Some("2024-01-01"));
        assert!(payload.folders[1].updated_at.is_none());
        assert_eq!(payload.folders[2].created_at.as_deref(), Some("2024-01-01T09:00:00.000+09:00"));
        assert_eq!(payload.folders[2].updated_at.as_deref(), Some("yesterday"));
        assert!(payload.memos[0].created_at.is_none());
        assert!(payload.memos[0].title.is_none());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let duplicate = r#"{ "folders": [
            { "id": "f1", "name": "A", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z" },
            { "id": "f1", "name": "B", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z" }
        ], "memos": [] }"#;
        let error = parse_backup(duplicate).expect_err("duplicate ids");
        assert!(error.to_string().contains("duplicate folder id f1"));
    }

    #[test]
    fn reports_record_paths_in_schema_errors() {
        let raw = r#"{ "folders": [ { "id": "f1" } ], "memos": [] }"#;
        let error = parse_backup(raw).expect_err("folder without a name");
        assert!(error.to_string().contains("/folders/0"), "{error}");

        let raw = r#"{ "folders": [], "memos": [ { "id": "m1", "title": "loose" } ] }"#;
        let error = parse_backup(raw).expect_err("memo without a folder");
        assert!(error.to_string().contains("/memos/0"), "{error}");
    }
}
