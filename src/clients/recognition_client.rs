/// 识别客户端接口
///
/// 编排层只通过这个 trait 与远端交互，测试中可以替换为模拟实现。
use async_trait::async_trait;

use crate::error::OcrResult;
use crate::models::job::{JobSnapshot, JobStatus};

/// 一次识别调用的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognition {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[async_trait]
pub trait RecognitionClient: Send + Sync {
    /// 同步识别一张 PNG 图片
    async fn recognize(&self, image: &[u8]) -> OcrResult<Recognition>;

    /// 上传批处理输入文件（JSONL），返回文件 ID
    async fn upload_bulk_input(&self, name: &str, payload: Vec<u8>) -> OcrResult<String>;

    /// 基于已上传的文件创建批处理任务，返回任务 ID
    async fn schedule_job(&self, input_file_id: &str) -> OcrResult<String>;

    /// 查询任务状态
    async fn job_status(&self, job_id: &str) -> OcrResult<JobSnapshot>;

    /// 请求取消任务，返回取消后的状态
    async fn cancel_job(&self, job_id: &str) -> OcrResult<JobStatus>;

    /// 下载输出文件内容
    async fn fetch_output(&self, file_id: &str) -> OcrResult<Vec<u8>>;

    /// 删除远端文件，返回远端是否确认删除
    async fn delete_artifact(&self, file_id: &str) -> OcrResult<bool>;
}
