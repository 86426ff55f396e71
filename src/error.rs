//! 统一的请求错误类型与 HTTP 状态转换。

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::io::ErrorKind;
use thiserror::Error;

use crate::storage::StorageError;

/// 单个请求范围内的错误，在路由边界转换为状态码与简短消息。
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("path escapes the serving root")]
    PathTraversal,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid file name: {0}")]
    InvalidName(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("upload failed: {0}")]
    UploadIo(String),
    #[error("method not allowed")]
    MethodNotAllowed { allow: &'static str },
    #[error("name already taken: {0}")]
    NameCollision(String),
    #[error("upload exceeds limit of {limit} bytes")]
    PayloadTooLarge { limit: u64 },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::PathTraversal => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidName(_) | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UploadIo(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::NameCollision(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, self.to_string()).into_response();
        if let ApiError::MethodNotAllowed { allow } = self {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static(allow));
        }
        response
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Traversal => ApiError::PathTraversal,
            StorageError::Reserved(path) => ApiError::NotFound(path),
            StorageError::Malformed => ApiError::InvalidRequest("malformed path".into()),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound(err.to_string()),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}
