/// 日志工具模块
///
/// 提供日志初始化以及格式化输出的辅助函数
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::unit::TokenUsage;

/// 初始化日志
///
/// 优先使用 `RUST_LOG`，否则默认 `info`，调试模式下为 `debug`。
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    if config.batch_mode {
        info!("🚀 程序启动 - 批处理模式");
        info!(
            "📦 分块上限: {} 个请求 / {} 字节, 轮询间隔 {:?}",
            config.chunk_limits.max_requests, config.chunk_limits.max_bytes, config.poll_interval
        );
    } else {
        info!("🚀 程序启动 - 即时识别模式");
        info!("📊 最大并发数: {}", config.workers);
    }
    info!("🤖 模型: {} ({})", config.model, config.api_base_url);
    info!("{}", "=".repeat(60));
}

/// 记录清单加载信息
pub fn log_units_loaded(total: usize, manifest: &str) {
    info!("✓ 从 {} 加载了 {} 张字幕图片", manifest, total);
}

/// 打印最终统计信息
pub fn print_final_stats(total: usize, usage: TokenUsage, elapsed: Duration, output_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 识别完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 字幕条数: {}", total);
    info!("⏱️ 识别用时: {:?}", elapsed);
    info!(
        "🔢 token 用量: prompt={}, completion={}",
        usage.prompt, usage.completion
    );
    info!("{}", "=".repeat(60));
    info!("\nSRT 已保存至: {}", output_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
