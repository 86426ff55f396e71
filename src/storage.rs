use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tokio::fs;
use tokio::io::ErrorKind;

/// Hidden directory under the serving root that holds in-flight uploads.
pub const PARTIAL_DIR_NAME: &str = ".upload-tmp";

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn partial_dir(&self) -> PathBuf {
        self.root.join(PARTIAL_DIR_NAME)
    }

    pub async fn ensure_partial_dir(&self) -> io::Result<PathBuf> {
        let dir = self.partial_dir();
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// 解码 URL 路径后解析为根目录下已存在的绝对路径。
    pub async fn resolve_request_path(&self, raw: &str) -> Result<PathBuf, StorageError> {
        let decoded = decode_request_path(raw)?;
        self.resolve_existing(&decoded).await
    }

    /// 解析并校验路径：目标必须存在，且路径中不含符号链接。
    pub async fn resolve_existing(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        self.ensure_no_symlink_components(&target).await?;
        Ok(target)
    }

    /// 纯词法解析：任何 `..`、绝对路径或盘符前缀都视为越界。
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);

        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => {
                    if segment.as_encoded_bytes().contains(&0) {
                        return Err(StorageError::Malformed);
                    }
                    normalized.push(segment)
                }
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::Traversal);
                }
            }
        }

        if normalized.components().next() == Some(Component::Normal(PARTIAL_DIR_NAME.as_ref())) {
            return Err(StorageError::Reserved(relative.to_string()));
        }

        Ok(self.root.join(normalized))
    }

    async fn ensure_no_symlink_components(&self, target: &Path) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::Traversal)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            let metadata = fs::symlink_metadata(&current).await?;
            if metadata.file_type().is_symlink() {
                return Err(StorageError::Traversal);
            }
            if components.peek().is_some() && !metadata.is_dir() {
                return Err(StorageError::Io(io::Error::from(ErrorKind::NotFound)));
            }
        }

        Ok(())
    }

    /// 返回根目录下的相对 URL 路径（`/` 分隔，不含前导斜杠）。
    pub fn relative_path(&self, path: &Path) -> Result<String, StorageError> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::Traversal)?;
        Ok(relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    /// 列出目录内容，按名称排序并隐藏上传临时目录。
    pub async fn list_dir(&self, target: &Path) -> Result<Vec<FileEntry>, StorageError> {
        let mut dir = fs::read_dir(target).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if target == self.root && name == PARTIAL_DIR_NAME {
                continue;
            }
            // Entries removed mid-listing.
            let metadata = match fs::symlink_metadata(&path).await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            };
            // Links are never served, so they are not listed either.
            if metadata.file_type().is_symlink() {
                continue;
            }
            let modified = metadata
                .modified()
                .ok()
                .and_then(|ts| ts.duration_since(UNIX_EPOCH).ok())
                .map(format_timestamp);
            let is_dir = metadata.is_dir();

            entries.push(FileEntry {
                name,
                path: self.relative_path(&path)?,
                is_dir,
                size: (!is_dir).then(|| metadata.len()),
                modified,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(entries)
    }
}

/// 对原始 URL 路径做百分号解码。
pub fn decode_request_path(raw: &str) -> Result<String, StorageError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| StorageError::Malformed)
}

fn format_timestamp(duration: Duration) -> String {
    let timestamp = UNIX_EPOCH + duration;
    let datetime: DateTime<Utc> = timestamp.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug)]
pub enum StorageError {
    Traversal,
    Reserved(String),
    Malformed,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub modified: Option<String>,
}
