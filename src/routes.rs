//! 路由表：GET/HEAD 浏览与下载，POST 上传，其余方法返回 405。

use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::sync::Arc;

use crate::observer::Observer;
use crate::storage::Storage;
use crate::upload::UploadConfig;
use crate::{files, http, upload};

pub const UPLOAD_ROUTE: &str = "/upload";

/// 构建应用路由；共享状态以 `Extension` 注入。
pub fn build_router(
    storage: Arc<Storage>,
    upload_config: Arc<UploadConfig>,
    observer: Arc<dyn Observer>,
) -> Router {
    Router::new()
        .route(
            UPLOAD_ROUTE,
            post(upload::upload_file)
                .get(files::serve_path)
                .fallback(files::reject_method)
                .layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/",
            get(files::serve_path).fallback(files::reject_method),
        )
        .route(
            "/{*path}",
            get(files::serve_path).fallback(files::reject_method),
        )
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(Extension(storage))
        .layer(Extension(upload_config))
        .layer(Extension(observer))
}
