//! 远端批处理任务及其状态机

use std::fmt;

use crate::error::{OcrError, OcrResult};

/// 远端批处理任务状态
///
/// 成功路径: `Validating → InProgress → Finalizing → Completed`。
/// `Cancelling → Cancelled` 只会由主动取消触发。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelling,
    Cancelled,
}

impl JobStatus {
    /// 解析远端返回的原始状态字符串，未知状态直接报错
    pub fn parse(job_id: &str, raw: &str) -> OcrResult<Self> {
        match raw {
            "validating" => Ok(JobStatus::Validating),
            "in_progress" => Ok(JobStatus::InProgress),
            "finalizing" => Ok(JobStatus::Finalizing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "expired" => Ok(JobStatus::Expired),
            "cancelling" => Ok(JobStatus::Cancelling),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(OcrError::UnexpectedJobStatus {
                job_id: job_id.to_string(),
                raw: raw.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Validating => "validating",
            JobStatus::InProgress => "in_progress",
            JobStatus::Finalizing => "finalizing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Expired | JobStatus::Cancelled
        )
    }

    /// 会让整次运行中止的终止状态
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Expired | JobStatus::Cancelled
        )
    }

    /// 状态只能向前推进，终止状态不能再离开
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        if *self == next {
            return true;
        }
        match self {
            Validating => !matches!(next, Validating),
            InProgress => matches!(
                next,
                Finalizing | Completed | Failed | Expired | Cancelling | Cancelled
            ),
            Finalizing => matches!(next, Completed | Failed | Expired | Cancelling | Cancelled),
            Cancelling => matches!(next, Cancelled),
            Completed | Failed | Expired | Cancelled => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次状态查询的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,
    /// 远端附带的错误描述（如有）
    pub detail: Option<String>,
}

impl JobSnapshot {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status,
            output_file_id: None,
            error_file_id: None,
            detail: None,
        }
    }
}

/// 已创建的远端任务
#[derive(Debug, Clone)]
pub struct RemoteJob {
    /// 对应的分块序号（从 0 开始）
    pub chunk: usize,
    pub job_id: String,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,
    pub status: JobStatus,
    pub detail: Option<String>,
}

impl RemoteJob {
    pub fn new(chunk: usize, job_id: String) -> Self {
        Self {
            chunk,
            job_id,
            output_file_id: None,
            error_file_id: None,
            status: JobStatus::Validating,
            detail: None,
        }
    }

    /// 应用一次查询结果，返回状态是否发生了变化
    ///
    /// 倒退的状态会被忽略并保留原状态。
    pub fn apply(&mut self, snapshot: JobSnapshot) -> bool {
        if !self.status.can_transition_to(snapshot.status) {
            tracing::warn!(
                "⚠️ 任务 {} 状态从 {} 倒退到 {}，忽略",
                self.job_id,
                self.status,
                snapshot.status
            );
            return false;
        }
        if snapshot.output_file_id.is_some() {
            self.output_file_id = snapshot.output_file_id;
        }
        if snapshot.error_file_id.is_some() {
            self.error_file_id = snapshot.error_file_id;
        }
        if snapshot.detail.is_some() {
            self.detail = snapshot.detail;
        }
        let changed = self.status != snapshot.status;
        self.status = snapshot.status;
        changed
    }

    /// 中止时是否需要发送取消请求
    pub fn needs_cancel(&self) -> bool {
        !self.status.is_terminal() && self.status != JobStatus::Cancelling
    }
}
