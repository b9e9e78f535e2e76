mod backup;
mod cli;
mod db;
mod errors;
mod models;
mod search;
mod store;

pub use crate::backup::{parse_backup, parse_backup_value};
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{
    AppSettings, BackupDocument, BooleanResponse, CreateMemoPayload, ExportResponse, Folder, FolderDeletion, Memo,
    RestorePayload, RestoreSummary, UpdateMemoPayload,
};
pub use crate::search::MemoMatcher;
pub use crate::store::NoteStore;

use crate::cli::{Args, BackupCommand, Commands, ConfirmArgs, FolderCommand, MemoCommand, SettingsCommand};
use clap::Parser;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

pub fn run() {
    let args = Args::parse();
    let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);

    if let Err(error) = std::fs::create_dir_all(&data_dir) {
        eprintln!("IO_FAILURE: {}: {}", data_dir.display(), error);
        std::process::exit(5);
    }
    // Held until exit so buffered log lines are flushed.
    let log_guard = match init_tracing(&data_dir) {
        Ok(guard) => Some(guard),
        Err(error) => {
            eprintln!("warning: file logging disabled: {}", error);
            None
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("INTERNAL: failed to start runtime: {}", error);
            std::process::exit(1);
        }
    };

    let exit = match runtime.block_on(execute(args.command, data_dir)) {
        Ok(()) => 0,
        Err(error) => {
            tracing::warn!(error = %error, "command failed");
            eprintln!("{}", error);
            error.exit_code()
        }
    };
    drop(runtime);
    drop(log_guard);
    std::process::exit(exit);
}

async fn execute(command: Commands, data_dir: PathBuf) -> AppResult<()> {
    let store = NoteStore::new(data_dir)?;

    match command {
        Commands::Folder(FolderCommand::List) => print_json(&store.list_folders_by_activity().await?),
        Commands::Folder(FolderCommand::Create { name }) => print_json(&store.create_folder(&name).await?),
        Commands::Folder(FolderCommand::Rename { id, name }) => print_json(&store.rename_folder(&id, &name).await?),
        Commands::Folder(FolderCommand::Delete { id, confirm }) => {
            require_confirmation(confirm, "deleting a folder also deletes its memos")?;
            print_json(&store.delete_folder(&id).await?)
        }
        Commands::Memo(MemoCommand::List { folder }) => {
            let memos = match folder {
                Some(folder_id) => store.list_memos_by_folder(&folder_id).await?,
                None => store.list_memos().await?,
            };
            print_json(&memos)
        }
        Commands::Memo(MemoCommand::Show { id }) => {
            let memo = store
                .get_memo(&id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Memo {} not found", id)))?;
            print_json(&memo)
        }
        Commands::Memo(MemoCommand::New(new)) => {
            let folder_id = match new.folder {
                Some(folder_id) => folder_id,
                None => store.resolve_uncategorized_folder().await?.id,
            };
            let content = read_body(new.content, new.stdin)?;
            let memo = store
                .create_memo(CreateMemoPayload {
                    folder_id,
                    title: new.title,
                    content,
                })
                .await?;
            print_json(&memo)
        }
        Commands::Memo(MemoCommand::Edit(edit)) => {
            let update = UpdateMemoPayload {
                folder_id: edit.folder,
                title: edit.title,
                content: read_body(edit.content, edit.stdin)?,
            };
            print_json(&store.update_memo(&edit.id, update).await?)
        }
        Commands::Memo(MemoCommand::Delete { id }) => {
            let success = store.delete_memo(&id).await?;
            print_json(&BooleanResponse { success })
        }
        Commands::Search { query } => print_json(&store.search_memos(&query).await?),
        Commands::Backup(BackupCommand::Export { out }) => {
            print_json(&store.export_to_file(out.as_deref()).await?)
        }
        Commands::Backup(BackupCommand::Import { file, confirm }) => {
            require_confirmation(confirm, "restoring a backup replaces every folder and memo")?;
            print_json(&store.import_from_file(&file).await?)
        }
        Commands::Reset(confirm) => {
            require_confirmation(confirm, "reset deletes every folder and memo")?;
            store.clear_all().await?;
            print_json(&BooleanResponse { success: true })
        }
        Commands::Settings(SettingsCommand::Show) => print_json(&store.get_settings().await?),
        Commands::Settings(SettingsCommand::Update { patch }) => {
            let patch: serde_json::Value = serde_json::from_str(&patch)
                .map_err(|error| AppError::InvalidInput(format!("settings patch is not valid JSON: {}", error)))?;
            print_json(&store.update_settings(patch).await?)
        }
    }
}

fn require_confirmation(confirm: ConfirmArgs, warning: &str) -> AppResult<()> {
    if confirm.yes {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("{}; pass --yes to continue", warning)))
    }
}

fn read_body(content: Option<String>, from_stdin: bool) -> AppResult<Option<String>> {
    if !from_stdin {
        return Ok(content);
    }
    let mut body = String::new();
    std::io::stdin().read_to_string(&mut body)?;
    Ok(Some(body))
}

fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn default_data_dir() -> PathBuf {
    #[cfg(unix)]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".memo-notes");
        }
    }

    #[cfg(windows)]
    {
        if let Ok(home) = std::env::var("USERPROFILE") {
            return PathBuf::from(home).join(".memo-notes");
        }
    }

    std::env::current_dir()
        .map(|cwd| cwd.join(".memo-notes"))
        .unwrap_or_else(|_| PathBuf::from(".memo-notes"))
}

fn init_tracing(data_dir: &Path) -> Result<WorkerGuard, String> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "memo-notes.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())?;
    Ok(guard)
}
