use std::time::Duration;

use crate::error::{OcrError, OcrResult};

/// 环境变量：API 密钥
pub const API_KEY_ENV: &str = "OAI_API_KEY";
/// 环境变量：兼容 OpenAI 的 API 地址
pub const BASE_URL_ENV: &str = "OAI_BASE_URL";

/// 批处理分块上限
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkLimits {
    /// 单块最多包含的请求数
    pub max_requests: usize,
    /// 单块序列化后的最大字节数
    pub max_bytes: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_requests: 50_000,
            max_bytes: 200_000_000,
        }
    }
}

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    // --- 模型配置 ---
    pub api_key: Option<String>,
    pub api_base_url: String,
    /// 识别所用的视觉模型
    pub model: String,
    /// 是否让模型标注斜体
    pub italic: bool,
    /// 单次 API 请求超时
    pub request_timeout: Duration,
    // --- 即时模式 ---
    /// 同时进行的识别请求数
    pub workers: usize,
    // --- 批处理模式 ---
    pub batch_mode: bool,
    pub chunk_limits: ChunkLimits,
    /// 批处理任务轮询间隔
    pub poll_interval: Duration,
    /// 远端批处理任务的完成时限
    pub completion_window: String,
    /// 本地等待批处理完成的最长时间
    pub max_wait: Option<Duration>,
    /// 是否输出每条识别结果
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            italic: false,
            request_timeout: Duration::from_secs(30),
            workers: 4,
            batch_mode: false,
            chunk_limits: ChunkLimits::default(),
            poll_interval: Duration::from_secs(60),
            completion_window: "24h".to_string(),
            max_wait: None,
            debug: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 从任意键值来源读取配置，缺失或无法解析的值使用默认值
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        let parsed = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());
        let flag = |name: &str| lookup(name).and_then(|v| v.trim().parse::<bool>().ok());
        let secs = |name: &str| parsed(name).map(Duration::from_secs);

        Self {
            api_key: lookup(API_KEY_ENV).filter(|v| !v.is_empty()),
            api_base_url: lookup(BASE_URL_ENV).unwrap_or(default.api_base_url),
            model: lookup("OCR_MODEL").unwrap_or(default.model),
            italic: flag("OCR_ITALIC").unwrap_or(default.italic),
            request_timeout: secs("OCR_TIMEOUT_SECS").unwrap_or(default.request_timeout),
            workers: parsed("OCR_WORKERS")
                .map(|v| v as usize)
                .unwrap_or(default.workers),
            batch_mode: flag("OCR_BATCH").unwrap_or(default.batch_mode),
            chunk_limits: ChunkLimits {
                max_requests: parsed("OCR_BATCH_MAX_REQUESTS")
                    .map(|v| v as usize)
                    .unwrap_or(default.chunk_limits.max_requests),
                max_bytes: parsed("OCR_BATCH_MAX_BYTES")
                    .map(|v| v as usize)
                    .unwrap_or(default.chunk_limits.max_bytes),
            },
            poll_interval: secs("OCR_POLL_SECS").unwrap_or(default.poll_interval),
            completion_window: lookup("OCR_COMPLETION_WINDOW").unwrap_or(default.completion_window),
            max_wait: secs("OCR_MAX_WAIT_SECS").or(default.max_wait),
            debug: flag("OCR_DEBUG").unwrap_or(default.debug),
        }
    }

    /// 检查配置是否可用
    pub fn validate(&self) -> OcrResult<()> {
        if self.workers == 0 {
            return Err(OcrError::Config("并发数必须大于 0".to_string()));
        }
        if self.chunk_limits.max_requests == 0 || self.chunk_limits.max_bytes == 0 {
            return Err(OcrError::Config("批处理分块上限必须大于 0".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(OcrError::Config("轮询间隔必须大于 0".to_string()));
        }
        reqwest::Url::parse(&self.api_base_url).map_err(|e| {
            OcrError::Config(format!("环境变量 {} 不是合法的 URL: {}", BASE_URL_ENV, e))
        })?;
        Ok(())
    }
}
