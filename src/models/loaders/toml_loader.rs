use crate::models::unit::RecognitionUnit;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// 字幕清单文件
///
/// 每个 `[[subtitle]]` 表对应一张已经从字幕轨道中导出的 PNG 图片。
#[derive(Debug, Clone, Deserialize)]
pub struct SubtitleManifest {
    #[serde(default, rename = "subtitle")]
    pub subtitles: Vec<ManifestEntry>,
}

/// 清单中的一条字幕
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    /// 图片路径，相对路径以清单文件所在目录为基准
    pub image: PathBuf,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// 解析清单内容（不读取图片）
pub fn parse_manifest(content: &str) -> Result<SubtitleManifest> {
    let manifest: SubtitleManifest = toml::from_str(content).context("无法解析字幕清单")?;

    for (index, entry) in manifest.subtitles.iter().enumerate() {
        if entry.end_ms < entry.start_ms {
            anyhow::bail!(
                "第 {} 条字幕的结束时间 {}ms 早于开始时间 {}ms",
                index + 1,
                entry.end_ms,
                entry.start_ms
            );
        }
    }

    Ok(manifest)
}

/// 从 TOML 清单加载全部识别单元
pub async fn load_manifest(manifest_path: &Path) -> Result<Vec<RecognitionUnit>> {
    let content = fs::read_to_string(manifest_path)
        .await
        .with_context(|| format!("无法读取字幕清单: {}", manifest_path.display()))?;

    let manifest = parse_manifest(&content)
        .with_context(|| format!("字幕清单无效: {}", manifest_path.display()))?;

    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let mut units = Vec::with_capacity(manifest.subtitles.len());

    for (index, entry) in manifest.subtitles.into_iter().enumerate() {
        let image_path = if entry.image.is_absolute() {
            entry.image
        } else {
            base_dir.join(entry.image)
        };

        let image = fs::read(&image_path)
            .await
            .with_context(|| format!("无法读取第 {} 张图片: {}", index + 1, image_path.display()))?;

        tracing::debug!(
            "已加载 #{} {} ({} 字节)",
            index + 1,
            image_path.display(),
            image.len()
        );

        units.push(RecognitionUnit::new(
            index,
            image,
            Duration::from_millis(entry.start_ms),
            Duration::from_millis(entry.end_ms),
        ));
    }

    Ok(units)
}
