//! 进度上报
//!
//! 编排层只负责发出事件，不关心事件被如何展示。

use crate::models::job::JobStatus;
use tracing::info;

/// 进度事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// 即时模式下完成了一个单元
    UnitCompleted {
        index: usize,
        completed: usize,
        total: usize,
    },
    /// 批处理模式下某个任务的状态发生了变化
    JobStatusChanged {
        chunk: usize,
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

/// 进度事件接收方
///
/// 实现必须立即返回，不能阻塞编排流程。
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// 把事件写入日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::UnitCompleted {
                completed, total, ..
            } => {
                info!(
                    "📈 识别进度: {}/{} ({:.1}%)",
                    completed,
                    total,
                    completed as f64 * 100.0 / total.max(1) as f64
                );
            }
            ProgressEvent::JobStatusChanged {
                chunk,
                job_id,
                from,
                to,
            } => {
                info!("🔄 第 {} 块任务 {} 状态: {} → {}", chunk + 1, job_id, from, to);
            }
        }
    }
}
