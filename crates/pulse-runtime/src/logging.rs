use tracing_subscriber::EnvFilter;

/// 初始化全局日志订阅器
///
/// 过滤规则优先读取 `RUST_LOG` 环境变量，未设置时默认 `info`。
/// 重复调用不会 panic，后续调用是无操作（方便多个测试共用进程）。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        // 连续初始化两次不应 panic
        init();
        init();
    }
}
