use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "memo-notes", version, about = "Local folder-and-memo notes")]
pub struct Args {
    /// Directory holding the database, logs and default backups.
    #[arg(long, env = "MEMO_NOTES_HOME", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(subcommand)]
    Folder(FolderCommand),
    #[command(subcommand)]
    Memo(MemoCommand),
    /// Case-insensitive search over memo titles and contents.
    Search { query: String },
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Delete every folder and memo.
    Reset(ConfirmArgs),
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand, Debug)]
pub enum FolderCommand {
    /// List folders, most recently active first.
    List,
    Create { name: String },
    Rename { id: String, name: String },
    /// Delete a folder together with all of its memos.
    Delete {
        id: String,
        #[command(flatten)]
        confirm: ConfirmArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum MemoCommand {
    List {
        #[arg(long)]
        folder: Option<String>,
    },
    Show { id: String },
    New(NewMemoArgs),
    Edit(EditMemoArgs),
    Delete { id: String },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct NewMemoArgs {
    /// Target folder id. Falls back to the uncategorized folder.
    #[arg(long)]
    pub folder: Option<String>,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long, group = "body")]
    pub content: Option<String>,

    /// Read the memo body from stdin.
    #[arg(long, group = "body")]
    pub stdin: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct EditMemoArgs {
    pub id: String,

    /// Move the memo to another folder.
    #[arg(long)]
    pub folder: Option<String>,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long, group = "body")]
    pub content: Option<String>,

    #[arg(long, group = "body")]
    pub stdin: bool,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replace the whole store with the contents of a backup file.
    Import {
        file: PathBuf,
        #[command(flatten)]
        confirm: ConfirmArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    Show,
    /// Merge a JSON object into the stored settings.
    Update { patch: String },
}

#[derive(ClapArgs, Debug, Clone, Copy)]
pub struct ConfirmArgs {
    /// Confirm a destructive operation.
    #[arg(long, default_value_t = false)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::{Args, BackupCommand, Commands, FolderCommand, MemoCommand};
    use clap::Parser;

    #[test]
    fn parses_nested_memo_command() {
        let args = Args::try_parse_from([
            "memo-notes", "--data-dir", "/tmp/notes", "memo", "new", "--title", "Plan", "--content", "buy milk",
        ])
        .expect("parse");
        assert_eq!(args.data_dir.as_deref(), Some(std::path::Path::new("/tmp/notes")));
        match args.command {
            Commands::Memo(MemoCommand::New(new)) => {
                assert!(new.folder.is_none());
                assert_eq!(new.title.as_deref(), Some("Plan"));
                assert_eq!(new.content.as_deref(), Some("buy milk"));
                assert!(!new.stdin);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn content_and_stdin_are_exclusive() {
        let parsed = Args::try_parse_from(["memo-notes", "memo", "new", "--content", "x", "--stdin"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn destructive_commands_default_to_unconfirmed() {
        let args = Args::try_parse_from(["memo-notes", "folder", "delete", "abc"]).expect("parse");
        match args.command {
            Commands::Folder(FolderCommand::Delete { id, confirm }) => {
                assert_eq!(id, "abc");
                assert!(!confirm.yes);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let args = Args::try_parse_from(["memo-notes", "backup", "import", "b.json", "--yes"]).expect("parse");
        assert!(matches!(
            args.command,
            Commands::Backup(BackupCommand::Import { confirm, .. }) if confirm.yes
        ));
    }
}
