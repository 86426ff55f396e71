//! multipart 上传处理器与未完成上传的清理。

use axum::extract::multipart::Field;
use axum::extract::{Extension, Multipart, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Json as JsonResponse, Response};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::atomic::{AtomicFile, Commit, PARTIAL_SUFFIX};
use crate::error::ApiError;
use crate::frontend;
use crate::http::{encode_url_path, prefers_html};
use crate::naming::{self, NamingPolicy};
use crate::observer::Observer;
use crate::storage::Storage;

#[derive(Debug)]
pub struct UploadConfig {
    pub naming: NamingPolicy,
    /// 0 disables the limit.
    pub max_size: u64,
    pub partial_ttl: Duration,
}

#[derive(Deserialize)]
pub(crate) struct UploadQuery {
    dir: Option<String>,
}

/// 上传完成后落盘的文件。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub name: String,
    /// Root-relative, `/` separated.
    pub path: String,
    pub size: u64,
    #[serde(skip)]
    pub absolute_path: PathBuf,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse<'a> {
    #[serde(flatten)]
    file: &'a StoredFile,
    #[serde(skip_serializing_if = "is_zero")]
    ignored_parts: usize,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

/// 接收 multipart 表单，只保存第一个文件字段。
///
/// 之后的文件字段会被读完并丢弃，数量在响应的 `ignoredParts` 中返回。
pub async fn upload_file(
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    Extension(observer): Extension<Arc<dyn Observer>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let dir = storage
        .resolve_existing(query.dir.as_deref().unwrap_or_default())
        .await?;
    let metadata = fs::metadata(&dir)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    if !metadata.is_dir() {
        return Err(ApiError::InvalidRequest(
            "upload target is not a directory".into(),
        ));
    }

    let mut stored: Option<StoredFile> = None;
    let mut ignored_parts = 0;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) if stored.is_some() => {
                debug!(error = %err, "trailing multipart data unreadable after stored part");
                break;
            }
            Err(err) => {
                return Err(ApiError::InvalidRequest(format!(
                    "malformed multipart body: {err}"
                )));
            }
        };
        // Browsers send an empty filename when no file was picked.
        let Some(file_name) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            continue;
        };
        if stored.is_some() {
            ignored_parts += 1;
            continue;
        }

        match store_part(&storage, &dir, &upload, &file_name, field).await {
            Ok(file) => {
                observer.upload_stored(&file);
                stored = Some(file);
            }
            Err(err) => {
                observer.upload_failed(&file_name, &err);
                return Err(err);
            }
        }
    }

    let Some(file) = stored else {
        return Err(ApiError::InvalidRequest("no file part in request".into()));
    };
    if ignored_parts > 0 {
        observer.extra_parts_ignored(&file, ignored_parts);
    }

    upload_response(&headers, &file, ignored_parts)
}

/// 把单个文件字段流式写入临时文件，再按命名策略提交。
async fn store_part(
    storage: &Storage,
    dir: &Path,
    upload: &UploadConfig,
    desired_name: &str,
    mut field: Field<'_>,
) -> Result<StoredFile, ApiError> {
    let allocation = naming::allocate(dir, desired_name, upload.naming)?;
    // 随机名不覆盖任何条目；保留原名时也不能替换目录。
    if let Ok(existing) = fs::symlink_metadata(&allocation.path).await
        && (!allocation.overwrite || existing.is_dir())
    {
        return Err(ApiError::NameCollision(allocation.name));
    }

    let partial_dir = storage
        .ensure_partial_dir()
        .await
        .map_err(|err| ApiError::UploadIo(err.to_string()))?;
    let mut atomic = AtomicFile::new(&partial_dir, &allocation.path).await?;
    debug!(
        name = allocation.name,
        partial = ?atomic.temp_path(),
        "upload stream started"
    );

    let write_result: Result<u64, ApiError> = async {
        let mut total_written: u64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| ApiError::UploadIo(err.to_string()))?
        {
            total_written += chunk.len() as u64;
            if upload.max_size > 0 && total_written > upload.max_size {
                return Err(ApiError::PayloadTooLarge {
                    limit: upload.max_size,
                });
            }
            atomic
                .file_mut()
                .write_all(&chunk)
                .await
                .map_err(|err| ApiError::UploadIo(err.to_string()))?;
        }
        Ok(total_written)
    }
    .await;
    let size = match write_result {
        Ok(size) => size,
        Err(err) => {
            atomic.cleanup().await;
            return Err(err);
        }
    };

    let commit = if allocation.overwrite {
        Commit::Replace
    } else {
        Commit::NoClobber
    };
    atomic.finalize(commit).await?;

    Ok(StoredFile {
        path: storage.relative_path(&allocation.path)?,
        name: allocation.name,
        size,
        absolute_path: allocation.path,
    })
}

fn upload_response(
    headers: &HeaderMap,
    file: &StoredFile,
    ignored_parts: usize,
) -> Result<Response, ApiError> {
    let location = encode_url_path(&file.path);
    let mut response = if prefers_html(headers) {
        Html(frontend::render_upload_result(file, &location, ignored_parts)).into_response()
    } else {
        JsonResponse(UploadResponse {
            file,
            ignored_parts,
        })
        .into_response()
    };
    *response.status_mut() = StatusCode::CREATED;
    response.headers_mut().insert(
        header::LOCATION,
        HeaderValue::from_str(&location)
            .map_err(|_| ApiError::Internal("invalid Location header".into()))?,
    );
    Ok(response)
}

/// 清理过期的未完成上传（进程崩溃或被强制终止时遗留）。
pub async fn cleanup_partials(
    storage: &Storage,
    upload: &UploadConfig,
) -> Result<usize, std::io::Error> {
    if upload.partial_ttl.is_zero() {
        return Ok(0);
    }

    let partial_dir = storage.partial_dir();
    if fs::metadata(&partial_dir).await.is_err() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;
    let mut dir = fs::read_dir(&partial_dir).await?;
    while let Some(entry) = dir.next_entry().await? {
        if !entry.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };
        if age >= upload.partial_ttl {
            let path = entry.path();
            if let Err(err) = fs::remove_file(&path).await {
                warn!(path = ?path, error = %err, "failed to remove stale partial upload");
            } else {
                info!(path = ?path, "removed stale partial upload");
                removed += 1;
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body as AxumBody, Bytes};
    use axum::extract::FromRequest;
    use axum::http::Request;
    use futures_util::stream;
    use std::io;

    use crate::test_support::{BOUNDARY, RecordingObserver, make_storage, multipart_request};

    fn make_upload_config(keep_original: bool) -> Arc<UploadConfig> {
        Arc::new(UploadConfig {
            naming: NamingPolicy { keep_original },
            max_size: 0,
            partial_ttl: Duration::from_secs(60),
        })
    }

    async fn run_upload(
        storage: &Arc<Storage>,
        upload: &Arc<UploadConfig>,
        observer: &Arc<RecordingObserver>,
        dir: Option<&str>,
        request: Request<AxumBody>,
    ) -> Result<Response, ApiError> {
        let headers = request.headers().clone();
        let multipart = Multipart::from_request(request, &())
            .await
            .unwrap_or_else(|_| panic!("multipart extractor rejected request"));
        let observer: Arc<dyn Observer> = observer.clone();
        upload_file(
            Query(UploadQuery {
                dir: dir.map(str::to_string),
            }),
            headers,
            Extension(storage.clone()),
            Extension(upload.clone()),
            Extension(observer),
            multipart,
        )
        .await
    }

    fn partial_leftovers(storage: &Storage) -> usize {
        std::fs::read_dir(storage.partial_dir())
            .map(|dir| dir.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn random_name_keeps_extension_and_reports_size() {
        let (_temp, storage) = make_storage();
        let upload = make_upload_config(false);
        let observer = Arc::new(RecordingObserver::default());
        let request = multipart_request(&[("file", Some("report.pdf"), b"%PDF-1.7")]);

        let response = run_upload(&storage, &upload, &observer, None, request)
            .await
            .unwrap_or_else(|err| panic!("upload failed: {err}"));
        assert_eq!(response.status(), StatusCode::CREATED);

        let entries: Vec<_> = std::fs::read_dir(storage.root_path())
            .expect("read root")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
            .filter(|name| !name.starts_with('.'))
            .collect();
        assert_eq!(entries.len(), 1);
        let name = &entries[0];
        assert!(name.starts_with("report-") && name.ends_with(".pdf"), "{name}");
        assert_eq!(
            response.headers().get(header::LOCATION).expect("location"),
            format!("/{name}").as_str()
        );
        assert_eq!(observer.events(), [format!("stored {name} 8")]);
        assert_eq!(partial_leftovers(&storage), 0);
    }

    #[tokio::test]
    async fn keep_original_replaces_previous_upload() {
        let (_temp, storage) = make_storage();
        let upload = make_upload_config(true);
        let observer = Arc::new(RecordingObserver::default());

        for content in [&b"first"[..], &b"second"[..]] {
            let request = multipart_request(&[("file", Some("a.txt"), content)]);
            run_upload(&storage, &upload, &observer, None, request)
                .await
                .unwrap_or_else(|err| panic!("upload failed: {err}"));
        }

        let contents = std::fs::read(storage.root_path().join("a.txt")).expect("read a.txt");
        assert_eq!(contents, b"second");
    }

    #[tokio::test]
    async fn keep_original_never_replaces_a_directory() {
        let (_temp, storage) = make_storage();
        std::fs::create_dir_all(storage.root_path().join("docs")).expect("create docs");
        std::fs::write(storage.root_path().join("docs").join("inner.txt"), b"keep")
            .expect("write inner");
        let upload = make_upload_config(true);
        let observer = Arc::new(RecordingObserver::default());
        let request = multipart_request(&[("file", Some("docs"), b"not a dir")]);

        let result = run_upload(&storage, &upload, &observer, None, request).await;
        assert!(matches!(result, Err(ApiError::NameCollision(ref name)) if name == "docs"));
        assert!(storage.root_path().join("docs").is_dir());
        assert!(storage.root_path().join("docs").join("inner.txt").exists());
        assert_eq!(partial_leftovers(&storage), 0);
        assert_eq!(observer.events(), ["failed docs 409"]);
    }

    #[tokio::test]
    async fn only_first_file_part_is_stored() {
        let (_temp, storage) = make_storage();
        let upload = make_upload_config(true);
        let observer = Arc::new(RecordingObserver::default());
        let request = multipart_request(&[
            ("note", None, b"just a form field"),
            ("file", Some("one.txt"), b"1"),
            ("file", Some("two.txt"), b"22"),
            ("file", Some("three.txt"), b"333"),
        ]);

        run_upload(&storage, &upload, &observer, None, request)
            .await
            .unwrap_or_else(|err| panic!("upload failed: {err}"));

        assert!(storage.root_path().join("one.txt").exists());
        assert!(!storage.root_path().join("two.txt").exists());
        assert!(!storage.root_path().join("three.txt").exists());
        assert_eq!(observer.events(), ["stored one.txt 1", "ignored one.txt 2"]);
    }

    #[tokio::test]
    async fn request_without_file_part_is_invalid() {
        let (_temp, storage) = make_storage();
        let upload = make_upload_config(false);
        let observer = Arc::new(RecordingObserver::default());
        let request = multipart_request(&[("note", None, b"hello"), ("file", Some(""), b"")]);

        let result = run_upload(&storage, &upload, &observer, None, request).await;
        assert!(matches!(result, Err(ApiError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn traversal_in_file_name_is_stripped() {
        let (temp, storage) = make_storage();
        let upload = make_upload_config(true);
        let observer = Arc::new(RecordingObserver::default());
        let request = multipart_request(&[("file", Some("../../escape.txt"), b"nope")]);

        run_upload(&storage, &upload, &observer, None, request)
            .await
            .unwrap_or_else(|err| panic!("upload failed: {err}"));

        assert!(storage.root_path().join("escape.txt").exists());
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn upload_into_subdirectory_and_reject_traversal_dir() {
        let (_temp, storage) = make_storage();
        std::fs::create_dir_all(storage.root_path().join("docs")).expect("create docs");
        let upload = make_upload_config(true);
        let observer = Arc::new(RecordingObserver::default());

        let request = multipart_request(&[("file", Some("a.md"), b"# hi")]);
        let response = run_upload(&storage, &upload, &observer, Some("docs"), request)
            .await
            .unwrap_or_else(|err| panic!("upload failed: {err}"));
        assert!(storage.root_path().join("docs").join("a.md").exists());
        assert_eq!(
            response.headers().get(header::LOCATION).expect("location"),
            "/docs/a.md"
        );

        let request = multipart_request(&[("file", Some("a.md"), b"# hi")]);
        let result = run_upload(&storage, &upload, &observer, Some(".."), request).await;
        assert!(matches!(result, Err(ApiError::PathTraversal)));

        let request = multipart_request(&[("file", Some("a.md"), b"x")]);
        let result = run_upload(&storage, &upload, &observer, Some("missing"), request).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn size_limit_rejects_and_leaves_nothing_behind() {
        let (_temp, storage) = make_storage();
        let upload = Arc::new(UploadConfig {
            naming: NamingPolicy {
                keep_original: true,
            },
            max_size: 4,
            partial_ttl: Duration::from_secs(60),
        });
        let observer = Arc::new(RecordingObserver::default());
        let request = multipart_request(&[("file", Some("big.bin"), b"0123456789")]);

        let result = run_upload(&storage, &upload, &observer, None, request).await;
        assert!(matches!(result, Err(ApiError::PayloadTooLarge { limit: 4 })));
        assert!(!storage.root_path().join("big.bin").exists());
        assert_eq!(partial_leftovers(&storage), 0);
        assert_eq!(observer.events(), ["failed big.bin 413"]);
    }

    #[tokio::test]
    async fn interrupted_stream_leaves_no_file() {
        let (_temp, storage) = make_storage();
        let upload = make_upload_config(true);
        let observer = Arc::new(RecordingObserver::default());

        let head = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"cut.bin\"\r\n\r\n"
        );
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from(head)),
            Ok(Bytes::from(vec![7u8; 64 * 1024])),
            Ok(Bytes::from(vec![7u8; 64 * 1024])),
            Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "client went away",
            )),
        ];
        let request = Request::post("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from_stream(stream::iter(chunks)))
            .expect("request");

        let result = run_upload(&storage, &upload, &observer, None, request).await;
        assert!(result.is_err());
        assert!(!storage.root_path().join("cut.bin").exists());
        assert_eq!(partial_leftovers(&storage), 0);
    }

    #[tokio::test]
    async fn cleanup_removes_only_stale_partials() {
        let (_temp, storage) = make_storage();
        let partial_dir = storage.ensure_partial_dir().await.expect("partial dir");
        std::fs::write(partial_dir.join("abc.part"), b"stale").expect("write partial");
        std::fs::write(partial_dir.join("notes.txt"), b"keep").expect("write other");

        let fresh = make_upload_config(false);
        assert_eq!(cleanup_partials(&storage, &fresh).await.expect("cleanup"), 0);

        let immediate = UploadConfig {
            naming: NamingPolicy::default(),
            max_size: 0,
            partial_ttl: Duration::from_nanos(1),
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(
            cleanup_partials(&storage, &immediate).await.expect("cleanup"),
            1
        );
        assert!(!partial_dir.join("abc.part").exists());
        assert!(partial_dir.join("notes.txt").exists());
    }
}
