//! Shared fixtures for handler and router tests.

use axum::body::Body as AxumBody;
use axum::http::{Request, header};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

use crate::error::ApiError;
use crate::memstats::MemorySample;
use crate::observer::Observer;
use crate::routes::UPLOAD_ROUTE;
use crate::storage::Storage;
use crate::upload::StoredFile;

pub const BOUNDARY: &str = "----upserve-test-boundary";

pub fn make_storage() -> (tempfile::TempDir, Arc<Storage>) {
    let temp = tempdir().expect("tempdir");
    let root = temp.path().join("storage");
    std::fs::create_dir_all(&root).expect("create storage root");
    (temp, Arc::new(Storage::new(root)))
}

/// `(field name, file name, content)`; `None` file name yields a plain form field.
pub fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_request(parts: &[(&str, Option<&str>, &[u8])]) -> Request<AxumBody> {
    Request::post(UPLOAD_ROUTE)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(AxumBody::from(multipart_body(parts)))
        .expect("multipart request")
}

/// Records every event as a short string for assertions.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("observer lock").clone()
    }

    fn push(&self, event: String) {
        self.events.lock().expect("observer lock").push(event);
    }
}

impl Observer for RecordingObserver {
    fn upload_stored(&self, file: &StoredFile) {
        self.push(format!("stored {} {}", file.name, file.size));
    }

    fn upload_failed(&self, desired_name: &str, error: &ApiError) {
        self.push(format!("failed {desired_name} {}", error.status().as_u16()));
    }

    fn extra_parts_ignored(&self, file: &StoredFile, ignored: usize) {
        self.push(format!("ignored {} {ignored}", file.name));
    }

    fn directory_listed(&self, _dir: &Path, entries: usize) {
        self.push(format!("listed {entries}"));
    }

    fn memory_sampled(&self, sample: &MemorySample) {
        self.push(format!("memory {}", sample.resident_bytes));
    }
}

#[test]
fn multipart_body_ends_with_closing_boundary() {
    let body = multipart_body(&[("file", Some("a.txt"), b"x")]);
    let text = String::from_utf8(body).expect("utf-8");
    assert!(text.starts_with(&format!("--{BOUNDARY}\r\n")));
    assert!(text.ends_with(&format!("--{BOUNDARY}--\r\n")));
}
