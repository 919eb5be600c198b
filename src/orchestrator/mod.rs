//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 把 N 个相互独立的识别请求变成一个完整、有序的结果集。
//!
//! ## 模块划分
//!
//! ### `interactive` - 即时识别调度器
//! - 一个投喂任务 + W 个工作任务
//! - 每个请求同步调用，延迟低
//! - 首个失败即停止投喂并返回错误
//!
//! ### `batch` - 批处理编排器
//! - 分块 → 上传 → 创建任务 → 轮询 → 取回 → 清理
//! - 延迟高（分钟到小时级），适合大量图片
//! - 负责远端文件和任务的完整生命周期
//!
//! ### `chunking` - 批处理分块
//! - 按请求数和字节数上限切分请求行
//!
//! ## 层次关系
//!
//! ```text
//! app (加载清单 / 写 SRT)
//!     ↓
//! orchestrator (interactive | batch)
//!     ↓
//! services (请求构建 / 进度 / SRT 写入)
//!     ↓
//! clients (RecognitionClient)
//! ```

pub mod batch;
pub mod chunking;
pub mod interactive;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::clients::RecognitionClient;
use crate::config::Config;
use crate::error::OcrResult;
use crate::models::unit::{OrderedResultSet, RecognitionUnit};
use crate::services::progress::ProgressSink;

// 重新导出主要类型
pub use batch::{BatchOrchestrator, CleanupReport};
pub use chunking::{plan_chunks, JobChunk};
pub use interactive::InteractiveDispatcher;

/// 按配置选择识别模式并执行
pub async fn run_ocr(
    config: &Config,
    client: Arc<dyn RecognitionClient>,
    progress: Arc<dyn ProgressSink>,
    units: &[RecognitionUnit],
    cancel: &CancellationToken,
) -> OcrResult<OrderedResultSet> {
    if config.batch_mode {
        BatchOrchestrator::from_config(config, client, progress)
            .run(units, cancel)
            .await
    } else {
        InteractiveDispatcher::new(client, progress, config.workers)
            .with_debug(config.debug)
            .run(units, cancel)
            .await
    }
}
