//! 未完成上传清理与内存监视的后台任务。

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{MEMORY_WATCH_INTERVAL_SECS, PARTIAL_CLEAN_INTERVAL_SECS};
use crate::memstats;
use crate::observer::Observer;
use crate::storage::Storage;
use crate::upload::{UploadConfig, cleanup_partials};

/// 启动后台任务（过期临时文件清理，以及可选的内存监视）。
pub fn spawn_background_tasks(
    storage: Arc<Storage>,
    upload: Arc<UploadConfig>,
    observer: Arc<dyn Observer>,
    watch_mem: bool,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(PARTIAL_CLEAN_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(err) = cleanup_partials(&storage, &upload).await {
                warn!(error = %err, "partial upload cleanup failed");
            }
        }
    });

    if watch_mem {
        tokio::spawn(watch_memory(observer));
    }
}

async fn watch_memory(observer: Arc<dyn Observer>) {
    let mut interval = tokio::time::interval(Duration::from_secs(MEMORY_WATCH_INTERVAL_SECS));
    loop {
        interval.tick().await;
        match memstats::sample() {
            Some(sample) => observer.memory_sampled(&sample),
            None => {
                warn!("memory watch is not supported on this platform");
                return;
            }
        }
    }
}
