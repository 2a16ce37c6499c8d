use crate::cli::{Cli, Command, ListArgs, UpdateArgs, UploadArgs};
use crate::error::{ErrorKind, Result};
use bytes::Bytes;
use cairn_config::{Config, StorageKind};
use cairn_metadata::{Database, Driver, Repository};
use cairn_storage::BackendHandle;
use cairn_storage::backend::{LocalBackend, S3Backend};
use cairn_vault::{ListRequest, MetadataUpdate, Settings, UploadRequest, Vault};
use exn::{OptionExt, ResultExt};
use futures::TryStreamExt;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use time::UtcDateTime;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Connect both stores and build the vault they back.
async fn open(config: &Config) -> Result<(Vault, Database)> {
    let db_config = &config.database;
    // SQLite creates the database file, but not its directory.
    if db_config.driver == Driver::Sqlite
        && !db_config.dsn.starts_with("sqlite:")
        && let Some(parent) = Path::new(&db_config.dsn).parent().filter(|p| !p.as_os_str().is_empty())
    {
        tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io(parent.to_path_buf()))?;
    }
    let db = Database::connect(db_config.driver, &db_config.dsn, &db_config.pool_settings())
        .await
        .or_raise(|| ErrorKind::Metadata)?;

    let storage = &config.storage;
    let blobs: BackendHandle = match storage.kind {
        StorageKind::Local => Arc::new(LocalBackend::new("local", &storage.root).or_raise(|| ErrorKind::Storage)?),
        StorageKind::S3 => {
            // Presence is checked when the configuration is validated.
            let required = |value: &Option<String>| value.clone().ok_or_raise(|| ErrorKind::Storage);
            let backend = S3Backend::new(
                "s3",
                required(&storage.bucket)?,
                storage.prefix.clone(),
                storage.region.clone(),
                storage.endpoint.clone(),
                required(&storage.key_id)?,
                required(&storage.key_secret)?,
            )
            .or_raise(|| ErrorKind::Storage)?;
            if storage.create_bucket {
                backend.ensure_bucket().await.or_raise(|| ErrorKind::Storage)?;
            }
            Arc::new(backend)
        },
    };
    tracing::debug!(blobs = blobs.name(), driver = ?db.driver(), "stores ready");

    let settings = Settings {
        max_upload_size: config.engine.max_upload_size,
        operation_timeout: config.engine.operation_timeout(),
    };
    Ok((Vault::new(blobs, Arc::new(Repository::from(&db)), settings), db))
}

fn print(value: &impl Serialize) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).or_raise(|| ErrorKind::Output)?;
    writeln!(stdout).or_raise(|| ErrorKind::Output)
}

fn timestamp(seconds: Option<i64>) -> Result<Option<UtcDateTime>> {
    seconds
        .map(|s| UtcDateTime::from_unix_timestamp(s).or_raise(|| ErrorKind::Usage("timestamp out of range")))
        .transpose()
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let (vault, db) = open(&config).await?;
    let result = dispatch(&vault, cli).await;
    db.close().await;
    result
}

async fn dispatch(vault: &Vault, cli: Cli) -> Result<()> {
    match cli.command {
        Command::Upload(args) => {
            let owner = cli.owner.ok_or_raise(|| ErrorKind::Usage("--owner (or CAIRN_OWNER) is required"))?;
            print(&upload(vault, owner, args).await?)
        },
        Command::Download(args) => {
            let download = vault.download(&args.file_id, args.version).await.or_raise(|| ErrorKind::Vault)?;
            tracing::info!(
                file_name = %download.file_name,
                size = download.size,
                version = download.version,
                "downloading"
            );
            match &args.output {
                Some(path) => {
                    let file = tokio::fs::File::create(path).await.or_raise(|| ErrorKind::Io(path.clone()))?;
                    copy(download.stream, file).await
                },
                None => copy(download.stream, tokio::io::stdout()).await,
            }
        },
        Command::Meta(args) => {
            print(&vault.metadata(&args.file_id, args.version).await.or_raise(|| ErrorKind::Vault)?)
        },
        Command::List(args) => {
            let request = list_request(cli.owner, args)?;
            print(&vault.list(&request).await.or_raise(|| ErrorKind::Vault)?)
        },
        Command::Revert(args) => {
            print(&vault.revert(&args.file_id, args.version).await.or_raise(|| ErrorKind::Vault)?)
        },
        Command::Delete(args) => {
            if let [file_id] = args.file_ids.as_slice() {
                vault.delete(file_id).await.or_raise(|| ErrorKind::Vault)?;
                print(&serde_json::json!({ "deleted": [file_id] }))
            } else {
                print(&vault.batch_delete(&args.file_ids).await.or_raise(|| ErrorKind::Vault)?)
            }
        },
        Command::Versions(args) => print(&vault.versions(&args.file_id).await.or_raise(|| ErrorKind::Vault)?),
        Command::Diff(args) => {
            print(&vault.diff(&args.file_id, args.from, args.to).await.or_raise(|| ErrorKind::Vault)?)
        },
        Command::Update(args) => print(&update(vault, args).await?),
    }
}

async fn upload(vault: &Vault, owner: String, args: UploadArgs) -> Result<cairn_vault::UploadReceipt> {
    let file_name = match args.name {
        Some(name) => name,
        None => args
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_raise(|| ErrorKind::Usage("--name is required when the path has no file name"))?,
    };
    let payload = read_payload(&args.path, vault.settings().max_upload_size).await?;
    let request = UploadRequest {
        owner,
        file_name,
        file_type: args.file_type,
        content_type: args.content_type,
        tags: args.tags,
        description: args.description,
        payload,
    };
    vault.upload(request).await.or_raise(|| ErrorKind::Vault)
}

/// Read a file to upload, refusing anything over `limit` before loading it.
async fn read_payload(path: &Path, limit: u64) -> Result<Bytes> {
    let size = tokio::fs::metadata(path).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))?.len();
    if size > limit {
        exn::bail!(ErrorKind::TooLarge { path: path.to_path_buf(), size, limit });
    }
    let payload = tokio::fs::read(path).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    Ok(Bytes::from(payload))
}

fn list_request(owner: Option<String>, args: ListArgs) -> Result<ListRequest> {
    Ok(ListRequest {
        owner,
        name: args.name,
        file_type: args.file_type,
        tag: args.tag,
        created_from: timestamp(args.created_from)?,
        created_to: timestamp(args.created_to)?,
        updated_from: timestamp(args.updated_from)?,
        updated_to: timestamp(args.updated_to)?,
        sort: args.sort,
        direction: args.direction,
        page: args.page,
        page_size: args.page_size,
    })
}

async fn update(vault: &Vault, args: UpdateArgs) -> Result<cairn_vault::FileMetadata> {
    let update = MetadataUpdate {
        file_name: args.name,
        file_type: args.file_type,
        description: args.description,
        tags: args.tags,
    };
    vault.update_metadata(&args.file_id, update).await.or_raise(|| ErrorKind::Vault)
}

async fn copy(mut stream: cairn_vault::DownloadStream, mut out: impl AsyncWrite + Unpin) -> Result<()> {
    while let Some(chunk) = stream.try_next().await.or_raise(|| ErrorKind::Vault)? {
        out.write_all(&chunk).await.or_raise(|| ErrorKind::Output)?;
    }
    out.flush().await.or_raise(|| ErrorKind::Output)
}
