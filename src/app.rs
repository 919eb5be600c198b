use crate::clients::{OpenAiRecognitionClient, RecognitionClient};
use crate::config::Config;
use crate::models::load_manifest;
use crate::orchestrator::run_ocr;
use crate::services::progress::LogProgress;
use crate::services::srt_writer::SrtWriter;
use crate::utils::logging::{log_startup, log_units_loaded, print_final_stats};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 应用主结构
pub struct App {
    config: Config,
    manifest_path: PathBuf,
    writer: SrtWriter,
    client: Arc<dyn RecognitionClient>,
    cancel: CancellationToken,
}

impl App {
    /// 初始化应用
    ///
    /// 输出文件在这里就会被创建，避免识别完成后才发现无法写入。
    pub async fn initialize(
        config: Config,
        manifest_path: PathBuf,
        output_path: PathBuf,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        check_extension(&manifest_path, "toml", "输入清单")?;
        check_extension(&output_path, "srt", "输出字幕")?;

        log_startup(&config);

        let writer = SrtWriter::create(&output_path)
            .with_context(|| format!("无法创建输出文件: {}", output_path.display()))?;

        let client = Arc::new(OpenAiRecognitionClient::new(&config)?);

        Ok(Self {
            config,
            manifest_path,
            writer,
            client,
            cancel,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(self) -> Result<()> {
        // 加载所有字幕图片
        info!("\n📁 正在读取字幕清单 {}", self.manifest_path.display());
        let units = load_manifest(&self.manifest_path).await?;
        log_units_loaded(units.len(), &self.manifest_path.display().to_string());

        if units.is_empty() {
            warn!("⚠️ 清单中没有字幕，写出空的 SRT 文件");
        }

        // 识别
        let start = Instant::now();
        let results = run_ocr(
            &self.config,
            self.client.clone(),
            Arc::new(LogProgress),
            &units,
            &self.cancel,
        )
        .await
        .context("OCR 失败")?;
        let elapsed = start.elapsed();

        // 写出 SRT
        let output_path = self.writer.path().display().to_string();
        self.writer.write(&results.results)?;

        print_final_stats(results.len(), results.usage, elapsed, &output_path);

        Ok(())
    }
}

fn check_extension(path: &Path, expected: &str, what: &str) -> Result<()> {
    let matches = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(expected));
    if !matches {
        anyhow::bail!("{}必须是 .{} 文件: {}", what, expected, path.display());
    }
    Ok(())
}
