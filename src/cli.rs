use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cairn", about = "Content-addressed, versioned file vault", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (TOML, YAML or JSON), layered over the defaults.
    #[arg(short, long, global = true, env = "CAIRN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Identity that owns uploads; also filters listings.
    #[arg(long, global = true, env = "CAIRN_OWNER")]
    pub owner: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store a file as version 1
    Upload(UploadArgs),
    /// Write the contents of a file version to a file or stdout
    Download(DownloadArgs),
    /// Show the metadata of a file version
    Meta(MetaArgs),
    /// List files
    List(ListArgs),
    /// Make an older version current again
    Revert(RevertArgs),
    /// Move one or more files to the trash
    Delete(DeleteArgs),
    /// Show the version history of a file
    Versions(VersionsArgs),
    /// Compare two versions of a file
    Diff(DiffArgs),
    /// Rename, retype, describe or re-tag a file
    Update(UpdateArgs),
}

#[derive(Args)]
pub struct UploadArgs {
    pub path: PathBuf,
    /// Stored file name; defaults to the name of `path`.
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long = "type")]
    pub file_type: Option<String>,
    #[arg(long)]
    pub content_type: Option<String>,
    /// Comma separated.
    #[arg(long, default_value = "")]
    pub tags: String,
    #[arg(long, default_value = "")]
    pub description: String,
}

#[derive(Args)]
pub struct DownloadArgs {
    pub file_id: String,
    /// Version number; the current version if omitted.
    #[arg(long)]
    pub version: Option<i64>,
    /// Destination file; stdout if omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct MetaArgs {
    pub file_id: String,
    #[arg(long)]
    pub version: Option<i64>,
}

#[derive(Args)]
pub struct ListArgs {
    /// Substring of the file name.
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long = "type")]
    pub file_type: Option<String>,
    #[arg(long)]
    pub tag: Option<String>,
    /// name, size, type or date.
    #[arg(long)]
    pub sort: Option<String>,
    /// asc or desc.
    #[arg(long)]
    pub direction: Option<String>,
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    pub page: i64,
    #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
    pub page_size: i64,
    /// Unix seconds.
    #[arg(long)]
    pub created_from: Option<i64>,
    #[arg(long)]
    pub created_to: Option<i64>,
    #[arg(long)]
    pub updated_from: Option<i64>,
    #[arg(long)]
    pub updated_to: Option<i64>,
}

#[derive(Args)]
pub struct RevertArgs {
    pub file_id: String,
    #[arg(allow_negative_numbers = true)]
    pub version: i64,
}

#[derive(Args)]
pub struct DeleteArgs {
    #[arg(required = true)]
    pub file_ids: Vec<String>,
}

#[derive(Args)]
pub struct VersionsArgs {
    pub file_id: String,
}

#[derive(Args)]
pub struct DiffArgs {
    pub file_id: String,
    pub from: i64,
    pub to: i64,
}

#[derive(Args)]
pub struct UpdateArgs {
    pub file_id: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long = "type")]
    pub file_type: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// Replaces every tag; an empty value clears them.
    #[arg(long)]
    pub tags: Option<String>,
}
