//! HTTP 辅助工具：内容协商、URL 编码、CORS 与安全头。

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::{middleware, response::Response};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::net::IpAddr;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

/// Characters escaped inside a single URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// 把根目录相对路径编码为以 `/` 开头的 URL 路径。
pub fn encode_url_path(relative: &str) -> String {
    let mut url = String::from("/");
    let encoded = relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/");
    url.push_str(&encoded);
    url
}

fn accept_header(headers: &HeaderMap) -> &str {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

/// 浏览器表单提交时返回 HTML。
pub fn prefers_html(headers: &HeaderMap) -> bool {
    accept_header(headers).contains("text/html")
}

/// 明确要求 JSON 且不接受 HTML 的客户端。
pub fn prefers_json(headers: &HeaderMap) -> bool {
    let accept = accept_header(headers);
    accept.contains("application/json") && !accept.contains("text/html")
}

/// 构建 CORS Layer（支持逗号分隔的来源列表）。
pub fn build_cors_layer(cors_origins: Option<&str>) -> Option<CorsLayer> {
    let origins = cors_origins?
        .split(',')
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// 综合 `x-forwarded-for` 与连接信息计算客户端 IP。
pub fn resolve_client_ip(headers: &HeaderMap, connect_ip: Option<IpAddr>) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
        .or(connect_ip)
}

/// 添加基础安全响应头。
pub async fn add_security_headers(
    request: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, StatusCode> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_paths_encode_each_segment() {
        assert_eq!(encode_url_path(""), "/");
        assert_eq!(encode_url_path("docs/a b#1.txt"), "/docs/a%20b%231.txt");
        assert_eq!(encode_url_path("报告.pdf"), "/%E6%8A%A5%E5%91%8A.pdf");
    }

    #[test]
    fn content_negotiation_follows_accept() {
        let mut headers = HeaderMap::new();
        assert!(!prefers_html(&headers));
        assert!(!prefers_json(&headers));

        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
        );
        assert!(prefers_html(&headers));
        assert!(!prefers_json(&headers));

        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert!(prefers_json(&headers));
    }

    #[test]
    fn forwarded_ip_wins_over_connection() {
        let mut headers = HeaderMap::new();
        let connect = Some("10.0.0.1".parse().expect("ip"));
        assert_eq!(resolve_client_ip(&headers, connect), connect);
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(
            resolve_client_ip(&headers, connect),
            Some("203.0.113.9".parse().expect("ip"))
        );
    }

    #[test]
    fn cors_layer_requires_valid_origins() {
        assert!(build_cors_layer(None).is_none());
        assert!(build_cors_layer(Some(" , ")).is_none());
        assert!(build_cors_layer(Some("http://localhost:3000")).is_some());
    }
}
