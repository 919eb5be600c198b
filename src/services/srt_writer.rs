//! SRT 字幕写入服务 - 业务能力层
//!
//! 只负责"把有序结果写成 .srt"能力，不关心结果从哪来

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::{OcrError, OcrResult};
use crate::models::unit::RecognitionResult;

/// UTF-8 BOM，部分播放器依赖它识别编码
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// SRT 写入服务
pub struct SrtWriter {
    path: PathBuf,
    file: File,
}

impl SrtWriter {
    /// 立即创建输出文件
    ///
    /// 在识别开始前调用，避免识别完成后才发现无法写入。
    pub fn create(path: impl AsRef<Path>) -> OcrResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file =
            File::create(&path).map_err(|e| OcrError::file(path.display().to_string(), e))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 写入全部字幕
    pub fn write(self, results: &[RecognitionResult]) -> OcrResult<()> {
        debug!("写入 {} 条字幕到 {}", results.len(), self.path.display());
        let path = self.path.display().to_string();
        let mut writer = BufWriter::new(self.file);
        write_srt(&mut writer, results)
            .and_then(|_| writer.flush())
            .map_err(|e| OcrError::file(path, e))
    }
}

/// 以 SRT 格式写入任意输出
pub fn write_srt(output: &mut impl Write, results: &[RecognitionResult]) -> std::io::Result<()> {
    output.write_all(UTF8_BOM)?;
    for (i, result) in results.iter().enumerate() {
        writeln!(output, "{}", i + 1)?;
        writeln!(
            output,
            "{} --> {}",
            format_timestamp(result.start_time),
            format_timestamp(result.end_time)
        )?;
        writeln!(output, "{}", result.text)?;
        writeln!(output)?;
    }
    Ok(())
}

/// `HH:MM:SS,mmm`
pub fn format_timestamp(time: Duration) -> String {
    let total_ms = time.as_millis();
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total_ms / 3_600_000,
        (total_ms / 60_000) % 60,
        (total_ms / 1_000) % 60,
        total_ms % 1_000
    )
}
