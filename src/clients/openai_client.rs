/// 兼容 OpenAI API 的识别客户端
///
/// - 即时识别走 `async-openai` 的 Chat Completion 接口
/// - 批处理相关的文件 / 任务接口直接用 `reqwest` 调用 REST API
use std::time::Duration;

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::clients::recognition_client::{Recognition, RecognitionClient};
use crate::config::{Config, API_KEY_ENV};
use crate::error::{OcrError, OcrResult};
use crate::models::job::{JobSnapshot, JobStatus};
use crate::services::request_builder::{RequestBuilder, BULK_ENDPOINT};
use crate::utils::logging::truncate_text;

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BatchObject {
    id: String,
    status: String,
    #[serde(default)]
    output_file_id: Option<String>,
    #[serde(default)]
    error_file_id: Option<String>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DeletedObject {
    #[serde(default)]
    deleted: bool,
}

/// OpenAI 识别客户端
pub struct OpenAiRecognitionClient {
    chat: Client<OpenAIConfig>,
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    builder: RequestBuilder,
    request_timeout: Duration,
    completion_window: String,
}

impl OpenAiRecognitionClient {
    /// 根据配置创建客户端
    pub fn new(config: &Config) -> OcrResult<Self> {
        let mut openai_config = OpenAIConfig::new().with_api_base(&config.api_base_url);
        match &config.api_key {
            Some(key) => openai_config = openai_config.with_api_key(key),
            None => warn!(
                "⚠️ 环境变量 {} 未设置，请求将不携带 API 密钥",
                API_KEY_ENV
            ),
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| OcrError::Config(format!("无法创建 HTTP 客户端: {}", e)))?;

        Ok(Self {
            chat: Client::with_config(openai_config),
            http,
            api_base: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            builder: RequestBuilder::new(&config.model, config.italic),
            request_timeout: config.request_timeout,
            completion_window: config.completion_window.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    /// 发送请求并检查 HTTP 状态
    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> OcrResult<reqwest::Response> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| OcrError::transport(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::transport(
                operation,
                format!("HTTP {}: {}", status, truncate_text(&body, 200)),
            ));
        }
        Ok(response)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> OcrResult<T> {
        self.send(operation, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| OcrError::transport(operation, e))
    }
}

#[async_trait]
impl RecognitionClient for OpenAiRecognitionClient {
    async fn recognize(&self, image: &[u8]) -> OcrResult<Recognition> {
        let request = self.builder.chat_request(image)?;

        let response = tokio::time::timeout(self.request_timeout, self.chat.chat().create(request))
            .await
            .map_err(|_| {
                OcrError::transport(
                    "chat.completions",
                    format!("请求超过 {:?} 未返回", self.request_timeout),
                )
            })?
            .map_err(|e| {
                warn!("LLM API 调用失败: {}", e);
                OcrError::transport("chat.completions", e)
            })?;

        let (prompt_tokens, completion_tokens) = response
            .usage
            .as_ref()
            .map(|u| (u.prompt_tokens as u64, u.completion_tokens as u64))
            .unwrap_or_default();

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| OcrError::EmptyCompletion {
                model: self.builder.model().to_string(),
            })?;

        Ok(Recognition {
            text: text.trim().to_string(),
            prompt_tokens,
            completion_tokens,
        })
    }

    async fn upload_bulk_input(&self, name: &str, payload: Vec<u8>) -> OcrResult<String> {
        let size = payload.len();
        let part = Part::bytes(payload)
            .file_name(name.to_string())
            .mime_str("application/jsonl")
            .map_err(|e| OcrError::transport("files.create", e))?;
        let form = Form::new().text("purpose", "batch").part("file", part);

        let file: FileObject = self
            .send_json("files.create", self.http.post(self.url("files")).multipart(form))
            .await?;
        debug!("已上传 {} ({} 字节) -> {}", name, size, file.id);
        Ok(file.id)
    }

    async fn schedule_job(&self, input_file_id: &str) -> OcrResult<String> {
        let body = json!({
            "input_file_id": input_file_id,
            "endpoint": BULK_ENDPOINT,
            "completion_window": self.completion_window,
        });
        let batch: BatchObject = self
            .send_json("batches.create", self.http.post(self.url("batches")).json(&body))
            .await?;
        Ok(batch.id)
    }

    async fn job_status(&self, job_id: &str) -> OcrResult<JobSnapshot> {
        let batch: BatchObject = self
            .send_json(
                "batches.retrieve",
                self.http.get(self.url(&format!("batches/{}", job_id))),
            )
            .await?;

        let status = JobStatus::parse(&batch.id, &batch.status).map_err(|e| {
            warn!("⚠️ 任务 {} 返回未知状态 {:?}", batch.id, batch.status);
            e
        })?;

        Ok(JobSnapshot {
            status,
            output_file_id: batch.output_file_id,
            error_file_id: batch.error_file_id,
            detail: batch.errors.filter(|e| !e.is_null()).map(|e| e.to_string()),
        })
    }

    async fn cancel_job(&self, job_id: &str) -> OcrResult<JobStatus> {
        let batch: BatchObject = self
            .send_json(
                "batches.cancel",
                self.http.post(self.url(&format!("batches/{}/cancel", job_id))),
            )
            .await?;
        JobStatus::parse(&batch.id, &batch.status)
    }

    async fn fetch_output(&self, file_id: &str) -> OcrResult<Vec<u8>> {
        let response = self
            .send(
                "files.content",
                self.http.get(self.url(&format!("files/{}/content", file_id))),
            )
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| OcrError::transport("files.content", e))?;
        Ok(bytes.to_vec())
    }

    async fn delete_artifact(&self, file_id: &str) -> OcrResult<bool> {
        let deleted: DeletedObject = self
            .send_json(
                "files.delete",
                self.http.delete(self.url(&format!("files/{}", file_id))),
            )
            .await?;
        Ok(deleted.deleted)
    }
}
