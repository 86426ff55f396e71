//! 服务事件观察者：上传、列表与内存采样事件通过注入的 sink 上报。

use std::path::Path;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::memstats::MemorySample;
use crate::upload::StoredFile;

/// Receives request-scoped events from the handlers and samples from the
/// background tasks. Implementations must be cheap; they run inline.
pub trait Observer: Send + Sync {
    fn upload_stored(&self, file: &StoredFile);

    fn upload_failed(&self, desired_name: &str, error: &ApiError);

    fn extra_parts_ignored(&self, file: &StoredFile, ignored: usize);

    fn directory_listed(&self, dir: &Path, entries: usize);

    fn memory_sampled(&self, sample: &MemorySample);
}

/// 默认实现：转发到 tracing。
#[derive(Debug, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn upload_stored(&self, file: &StoredFile) {
        info!(
            name = file.name,
            path = file.path,
            size = file.size,
            location = ?file.absolute_path,
            "upload stored"
        );
    }

    fn upload_failed(&self, desired_name: &str, error: &ApiError) {
        warn!(name = desired_name, error = %error, "upload failed");
    }

    fn extra_parts_ignored(&self, file: &StoredFile, ignored: usize) {
        warn!(
            stored = file.name,
            ignored, "multipart request carried more than one file part, extra parts ignored"
        );
    }

    fn directory_listed(&self, dir: &Path, entries: usize) {
        info!(dir = ?dir, count = entries, "list directory");
    }

    fn memory_sampled(&self, sample: &MemorySample) {
        info!(
            log = "memstats",
            rss_mib = sample.resident_bytes / 1024 / 1024,
            peak_rss_mib = sample.peak_resident_bytes / 1024 / 1024,
            virtual_mib = sample.virtual_bytes / 1024 / 1024,
            threads = sample.threads,
            "memory usage"
        );
    }
}
