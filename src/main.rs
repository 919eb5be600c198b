use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use subtitle_ocr::utils::logging;
use subtitle_ocr::{App, Config};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Parser, Debug)]
#[command(
    name = "subtitle-ocr",
    version,
    about = "用视觉大模型把图片字幕识别为 SRT 字幕"
)]
struct Cli {
    /// 字幕清单 (.toml)
    #[arg(short, long)]
    input: PathBuf,

    /// 输出字幕 (.srt)
    #[arg(short, long)]
    output: PathBuf,

    /// 视觉模型名称
    #[arg(long)]
    model: Option<String>,

    /// 让模型标注斜体（并非所有模型都能做好）
    #[arg(long)]
    italic: bool,

    /// 单次 API 请求超时（秒）
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// 即时模式下的并发请求数
    #[arg(long)]
    workers: Option<usize>,

    /// 使用批处理接口（更便宜，但可能需要数小时）
    #[arg(long)]
    batch: bool,

    /// 输出每条识别结果
    #[arg(long)]
    debug: bool,
}

impl Cli {
    /// 命令行参数覆盖环境变量配置
    fn apply(&self, mut config: Config) -> Config {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(secs) = self.timeout {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.italic |= self.italic;
        config.batch_mode |= self.batch;
        config.debug |= self.debug;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let config = cli.apply(Config::from_env());

    // 初始化日志
    logging::init(config.debug);

    // 收到 Ctrl-C / SIGTERM 时取消本次运行
    let cancel = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(cancel.clone()));

    // 初始化并运行应用
    let app = App::initialize(config, cli.input, cli.output, cancel).await?;
    if let Err(e) = app.run().await {
        error!("❌ {:#}", e);
        return Err(e);
    }

    Ok(())
}

async fn wait_for_shutdown(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("无法监听 SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    warn!("⚠️ 收到退出信号，正在取消...");
    cancel.cancel();
}
