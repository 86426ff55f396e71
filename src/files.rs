//! 目录浏览与文件下载处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Query};
use axum::http::{Request, Uri};
use axum::response::{Html, IntoResponse, Json as JsonResponse, Response};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::debug;

use crate::error::ApiError;
use crate::frontend;
use crate::http::prefers_json;
use crate::observer::Observer;
use crate::routes::UPLOAD_ROUTE;
use crate::storage::Storage;

#[derive(Deserialize)]
pub(crate) struct BrowseQuery {
    format: Option<String>,
}

/// GET/HEAD：目录返回索引，文件交给 `ServeFile`（Range、条件请求、Content-Type）。
pub async fn serve_path(
    Query(query): Query<BrowseQuery>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(observer): Extension<Arc<dyn Observer>>,
    request: Request<AxumBody>,
) -> Result<Response, ApiError> {
    let target = storage.resolve_request_path(request.uri().path()).await?;
    let metadata = fs::metadata(&target)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    if metadata.is_dir() {
        let as_json = query.format.as_deref() == Some("json") || prefers_json(request.headers());
        return list_directory(&storage, observer.as_ref(), &target, as_json).await;
    }

    debug!(path = ?target, size = metadata.len(), "serve file");
    let response = ServeFile::new(&target)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});
    Ok(response.map(AxumBody::new))
}

async fn list_directory(
    storage: &Storage,
    observer: &dyn Observer,
    target: &Path,
    as_json: bool,
) -> Result<Response, ApiError> {
    let entries = storage.list_dir(target).await?;
    observer.directory_listed(target, entries.len());
    if as_json {
        return Ok(JsonResponse(entries).into_response());
    }
    let relative = storage.relative_path(target)?;
    Ok(Html(frontend::render_index(&relative, &entries)).into_response())
}

/// 未注册方法的兜底处理：405 并附带 `Allow`。
pub async fn reject_method(uri: Uri) -> ApiError {
    let allow = if uri.path() == UPLOAD_ROUTE {
        "GET, HEAD, POST"
    } else {
        "GET, HEAD"
    };
    ApiError::MethodNotAllowed { allow }
}
