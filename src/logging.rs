//! 日志初始化：支持环境变量覆盖与默认值。

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化 tracing 日志订阅；开发模式下默认输出全部级别。
pub fn init_logging(dev_mode: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(dev_mode)));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(dev_mode))
        .init();
}

fn default_directive(dev_mode: bool) -> &'static str {
    if dev_mode { "trace" } else { "info" }
}

#[cfg(test)]
mod tests {
    use super::default_directive;

    #[test]
    fn dev_mode_logs_everything() {
        assert_eq!(default_directive(true), "trace");
        assert_eq!(default_directive(false), "info");
    }
}
