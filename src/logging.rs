// logging.rs — 日志初始化
// 日志写到 stderr，stdout 只留给结果列表

use tracing_subscriber::EnvFilter;

/// 日志过滤规则的环境变量，语法同 RUST_LOG
pub const LOG_ENV: &str = "PIXELVAULT_LOG";

/// 初始化全局日志；`verbose` 时默认级别从 warn 提升到 debug
pub fn init(verbose: bool) {
    let default_level = if verbose { "pixelvault=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    // 重复初始化时忽略错误
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
