//! 进程内存采样（Linux 读取 `/proc/self/status`）。

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemorySample {
    pub resident_bytes: u64,
    pub peak_resident_bytes: u64,
    pub virtual_bytes: u64,
    pub threads: u64,
}

/// 采集当前进程的内存使用；不支持的平台返回 `None`。
pub fn sample() -> Option<MemorySample> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_status(&status)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

pub fn parse_status(status: &str) -> Option<MemorySample> {
    let mut sample = MemorySample::default();
    let mut seen_rss = false;
    for line in status.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let mut fields = value.split_whitespace();
        let Some(number) = fields.next().and_then(|v| v.parse::<u64>().ok()) else {
            continue;
        };
        let bytes = match fields.next() {
            Some("kB") => number * 1024,
            _ => number,
        };
        match key {
            "VmRSS" => {
                sample.resident_bytes = bytes;
                seen_rss = true;
            }
            "VmHWM" => sample.peak_resident_bytes = bytes,
            "VmSize" => sample.virtual_bytes = bytes,
            "Threads" => sample.threads = number,
            _ => {}
        }
    }
    seen_rss.then_some(sample)
}
