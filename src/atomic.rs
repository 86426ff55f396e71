//! 临时写入与原子提交的辅助方法。

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;

/// Suffix of in-flight upload files inside the partial directory.
pub const PARTIAL_SUFFIX: &str = ".part";

/// 目标已存在时的提交方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Commit {
    Replace,
    NoClobber,
}

/// 在临时目录写入、完成后再移动到目标路径的文件封装。
///
/// 未提交即被丢弃时（例如连接中断导致处理器 future 被取消），
/// 临时文件会被同步删除，目标路径上不会留下残缺文件。
pub struct AtomicFile {
    target: PathBuf,
    file: File,
    guard: PartialGuard,
}

impl AtomicFile {
    /// 在 `partial_dir` 中创建临时文件。
    pub async fn new(partial_dir: &Path, target: &Path) -> Result<Self, ApiError> {
        let temp_path = partial_dir.join(format!("{}{PARTIAL_SUFFIX}", Uuid::new_v4()));
        let file = File::create_new(&temp_path)
            .await
            .map_err(|err| ApiError::UploadIo(err.to_string()))?;
        Ok(Self {
            target: target.to_path_buf(),
            file,
            guard: PartialGuard {
                path: temp_path,
                armed: true,
            },
        })
    }

    /// 返回临时文件的可写句柄。
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn temp_path(&self) -> &Path {
        &self.guard.path
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(mut self) {
        if let Err(err) = fs::remove_file(&self.guard.path).await {
            warn!(path = ?self.guard.path, error = %err, "failed to remove partial upload");
        }
        self.guard.armed = false;
    }

    /// 同步数据并提交到目标路径。
    pub async fn finalize(self, commit: Commit) -> Result<(), ApiError> {
        let AtomicFile {
            target,
            file,
            mut guard,
        } = self;
        file.sync_all()
            .await
            .map_err(|err| ApiError::UploadIo(err.to_string()))?;
        drop(file);

        match commit {
            Commit::Replace => replace(&guard.path, &target).await?,
            Commit::NoClobber => link_no_clobber(&guard.path, &target).await?,
        }
        guard.armed = false;

        if let Some(parent) = target.parent() {
            let _ = sync_dir(parent).await;
        }

        Ok(())
    }
}

async fn replace(temp_path: &Path, target: &Path) -> Result<(), ApiError> {
    if let Err(err) = fs::rename(temp_path, target).await {
        #[cfg(windows)]
        {
            if fs::remove_file(target).await.is_ok() {
                return fs::rename(temp_path, target)
                    .await
                    .map_err(|err| ApiError::UploadIo(err.to_string()));
            }
        }
        return Err(ApiError::UploadIo(err.to_string()));
    }
    Ok(())
}

/// 以硬链接提交，目标已存在时失败；文件系统不支持硬链接时退化为检查后重命名。
async fn link_no_clobber(temp_path: &Path, target: &Path) -> Result<(), ApiError> {
    match fs::hard_link(temp_path, target).await {
        Ok(()) => {
            if let Err(err) = fs::remove_file(temp_path).await {
                warn!(path = ?temp_path, error = %err, "failed to remove linked partial upload");
            }
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            Err(ApiError::NameCollision(target.display().to_string()))
        }
        Err(_) => {
            if fs::symlink_metadata(target).await.is_ok() {
                return Err(ApiError::NameCollision(target.display().to_string()));
            }
            fs::rename(temp_path, target)
                .await
                .map_err(|err| ApiError::UploadIo(err.to_string()))
        }
    }
}

struct PartialGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for PartialGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}
