use std::fmt;

use crate::models::job::JobStatus;

/// 第三方错误的统一装箱类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// OCR 编排错误类型
///
/// 任何一个变体都会让整次运行失败，调用方拿不到不完整的结果集。
/// 只有远端文件删除失败例外：它只记录日志，不会出现在这里。
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    /// 单张图片识别失败
    #[error("识别第 {} 张图片失败: {source}", .index + 1)]
    Recognition {
        index: usize,
        #[source]
        source: BoxError,
    },

    /// 远端接口调用失败（上传 / 创建任务 / 轮询 / 下载 / 删除）
    #[error("远端调用失败 ({operation}): {source}")]
    Transport {
        operation: String,
        #[source]
        source: BoxError,
    },

    /// 模型返回了空内容
    #[error("模型返回内容为空 (模型: {model})")]
    EmptyCompletion { model: String },

    /// 批处理任务进入了失败类终止状态
    #[error("批处理任务 {job_id} (第 {} 块) 进入终止状态 {status}: {detail}", .chunk + 1)]
    JobTerminal {
        chunk: usize,
        job_id: String,
        status: JobStatus,
        detail: String,
    },

    /// 远端返回了无法识别的任务状态
    #[error("任务 {job_id} 返回了未知状态: {raw:?}")]
    UnexpectedJobStatus { job_id: String, raw: String },

    /// 批处理输出解析失败
    #[error("结果解析失败 ({context}): {message}")]
    Parse { context: String, message: String },

    /// 运行被取消或等待超时
    #[error("运行在 {stage} 阶段中止: {cause}")]
    Cancelled {
        stage: &'static str,
        cause: CancelCause,
    },

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 本地文件读写错误
    #[error("文件错误 ({path}): {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 取消原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// 外部取消（Ctrl-C / SIGTERM / 调用方取消）
    Interrupted,
    /// 超过最长等待时间
    TimedOut,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Interrupted => write!(f, "已被取消"),
            CancelCause::TimedOut => write!(f, "等待超时"),
        }
    }
}

// ========== 便捷构造函数 ==========

impl OcrError {
    /// 创建单张图片识别错误
    pub fn recognition(index: usize, source: impl Into<BoxError>) -> Self {
        OcrError::Recognition {
            index,
            source: source.into(),
        }
    }

    /// 创建远端调用错误
    pub fn transport(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        OcrError::Transport {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// 创建解析错误
    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        OcrError::Parse {
            context: context.into(),
            message: message.into(),
        }
    }

    /// 创建取消错误
    pub fn cancelled(stage: &'static str) -> Self {
        OcrError::Cancelled {
            stage,
            cause: CancelCause::Interrupted,
        }
    }

    /// 创建超时错误
    pub fn timed_out(stage: &'static str) -> Self {
        OcrError::Cancelled {
            stage,
            cause: CancelCause::TimedOut,
        }
    }

    /// 创建文件错误
    pub fn file(path: impl Into<String>, source: std::io::Error) -> Self {
        OcrError::File {
            path: path.into(),
            source,
        }
    }

    /// 是否为取消 / 超时导致的错误
    pub fn is_cancellation(&self) -> bool {
        matches!(self, OcrError::Cancelled { .. })
    }
}

impl From<serde_json::Error> for OcrError {
    fn from(err: serde_json::Error) -> Self {
        OcrError::parse("JSON", err.to_string())
    }
}

// ========== Result 类型别名 ==========

/// OCR 结果类型
pub type OcrResult<T> = Result<T, OcrError>;
