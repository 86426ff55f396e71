//! 目录索引与上传结果的最小 HTML 页面。

use htmlescape::encode_minimal;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::fmt::Write;

use crate::http::encode_url_path;
use crate::routes::UPLOAD_ROUTE;
use crate::storage::FileEntry;
use crate::upload::StoredFile;

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse}\
td,th{padding:.2em 1em;text-align:left}\
td.size{text-align:right;font-variant-numeric:tabular-nums}";

/// 渲染目录索引页：上级链接、上传表单与条目表格。
pub fn render_index(dir: &str, entries: &[FileEntry]) -> String {
    let dir_url = directory_url(dir);
    let title = format!("Index of {}", dir_url);
    let upload_action = if dir.is_empty() {
        UPLOAD_ROUTE.to_string()
    } else {
        format!(
            "{UPLOAD_ROUTE}?dir={}",
            utf8_percent_encode(dir, NON_ALPHANUMERIC)
        )
    };

    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title>\
         <style>{STYLE}</style></head><body>\n<h1>{title}</h1>\n\
         <form method=\"post\" enctype=\"multipart/form-data\" action=\"{action}\">\
         <input type=\"file\" name=\"file\" required> <button type=\"submit\">Upload</button>\
         </form>\n<table>\n<thead><tr><th>Name</th><th>Size</th><th>Modified</th></tr></thead>\n<tbody>\n",
        title = encode_minimal(&title),
        action = encode_minimal(&upload_action),
    );

    if !dir.is_empty() {
        let parent = dir.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("");
        let _ = writeln!(
            html,
            "<tr><td><a href=\"{}\">../</a></td><td></td><td></td></tr>",
            encode_minimal(&directory_url(parent))
        );
    }

    for entry in entries {
        let (href, label) = if entry.is_dir {
            (directory_url(&entry.path), format!("{}/", entry.name))
        } else {
            (encode_url_path(&entry.path), entry.name.clone())
        };
        let _ = writeln!(
            html,
            "<tr><td><a href=\"{}\">{}</a></td><td class=\"size\">{}</td><td>{}</td></tr>",
            encode_minimal(&href),
            encode_minimal(&label),
            entry.size.map(human_size).unwrap_or_default(),
            encode_minimal(entry.modified.as_deref().unwrap_or("")),
        );
    }

    html.push_str("</tbody>\n</table>\n</body></html>\n");
    html
}

/// 浏览器上传完成后展示的确认页。
pub fn render_upload_result(file: &StoredFile, location: &str, ignored_parts: usize) -> String {
    let parent = file.path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("");
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Uploaded</title>\
         <style>{STYLE}</style></head><body>\n\
         <p>Stored <a href=\"{href}\">{name}</a> ({size} bytes).</p>\n",
        href = encode_minimal(location),
        name = encode_minimal(&file.name),
        size = file.size,
    );
    if ignored_parts > 0 {
        let _ = writeln!(
            html,
            "<p>{ignored_parts} additional file(s) in the request were ignored.</p>"
        );
    }
    let _ = write!(
        html,
        "<p><a href=\"{}\">Back to listing</a></p>\n</body></html>\n",
        encode_minimal(&directory_url(parent))
    );
    html
}

fn directory_url(relative: &str) -> String {
    let url = encode_url_path(relative);
    if url.ends_with('/') { url } else { url + "/" }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
