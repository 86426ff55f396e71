//! 上传文件名分配：去除目录成分，并按策略保留原名或注入随机标记。

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::ApiError;
use crate::storage::PARTIAL_DIR_NAME;

/// Hex characters taken from a v4 UUID; 60 of the 64 bits are random.
const TOKEN_LEN: usize = 16;

#[derive(Clone, Copy, Debug, Default)]
pub struct NamingPolicy {
    pub keep_original: bool,
}

/// 分配结果：最终文件名、目标绝对路径，以及是否允许覆盖已有文件。
#[derive(Debug)]
pub struct Allocation {
    pub name: String,
    pub path: PathBuf,
    pub overwrite: bool,
}

/// 为客户端提供的文件名分配落盘名称。
///
/// 保留原名时同名文件会被覆盖；否则在扩展名前插入随机标记，
/// 标记空间足够大，调用方无需加锁或重试。
pub fn allocate(dir: &Path, desired: &str, policy: NamingPolicy) -> Result<Allocation, ApiError> {
    let base = bare_name(desired)?;
    let name = if policy.keep_original {
        base.to_string()
    } else {
        let (stem, extension) = split_extension(base);
        format!("{stem}-{}{extension}", random_token())
    };

    Ok(Allocation {
        path: dir.join(&name),
        name,
        overwrite: policy.keep_original,
    })
}

/// 去掉客户端可能附带的目录（含 Windows 风格的反斜杠）。
fn bare_name(desired: &str) -> Result<&str, ApiError> {
    let base = desired
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    if base.is_empty() || base == "." || base == ".." || base == PARTIAL_DIR_NAME {
        return Err(ApiError::InvalidName(desired.to_string()));
    }
    if base.chars().any(char::is_control) {
        return Err(ApiError::InvalidName(desired.escape_debug().to_string()));
    }
    Ok(base)
}

/// `archive.tar.gz` -> (`archive.tar`, `.gz`); leading dots don't start an extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) if index > 0 && !name[..index].chars().all(|c| c == '.') => {
            name.split_at(index)
        }
        _ => (name, ""),
    }
}

fn random_token() -> String {
    let mut token = Uuid::new_v4().simple().to_string();
    token.truncate(TOKEN_LEN);
    token
}
