//! 识别请求构建 - 业务能力层
//!
//! 即时模式和批处理模式共用同一份请求体：
//! - 系统提示词 + 可选的斜体规则
//! - 图片以 `data:image/png;base64,...` 的形式放进用户消息
//!
//! 批处理模式下每个请求序列化为一行 JSON，`custom_id` 是单元的原始索引，
//! 输出文件中的每一行通过同一个 `custom_id` 对应回原单元。

use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
    ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, ImageDetail, ImageUrl,
};
use base64::{engine::general_purpose, Engine};
use serde::{Deserialize, Serialize};

use crate::clients::Recognition;
use crate::error::{OcrError, OcrResult};

/// 批处理请求的目标接口
pub const BULK_ENDPOINT: &str = "/v1/chat/completions";

const SYSTEM_PROMPT: &str = "Transcribe the subtitle text shown in the image. \
Output only the transcribed text: no quotes, no comments, nothing that is not in the image. \
Keep the wording exactly as displayed, even when a sentence is incomplete. \
Keep the original line breaks and do not add spaces or empty lines. \
Any text provided by the user is an additional formatting rule to follow.";

const ITALIC_PROMPT: &str = "Mark italic text with HTML tags. \
A single italic word becomes <i>word</i>. \
Consecutive italic words share one pair of tags: plain <i>italic words here</i> plain. \
When italic words continue on the next line, keep a single pair of tags around the whole run, line break included.";

/// 识别请求构建器
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    model: String,
    italic: bool,
}

impl RequestBuilder {
    pub fn new(model: impl Into<String>, italic: bool) -> Self {
        Self {
            model: model.into(),
            italic,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 为一张图片构建 Chat Completion 请求
    pub fn chat_request(&self, image: &[u8]) -> OcrResult<CreateChatCompletionRequest> {
        let build_failed = |e: OpenAIError| OcrError::transport("构建识别请求", e);

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_PROMPT)
            .build()
            .map_err(build_failed)?;

        let mut content_parts: Vec<ChatCompletionRequestUserMessageContentPart> =
            Vec::with_capacity(2);
        if self.italic {
            content_parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: ITALIC_PROMPT.to_string(),
                },
            ));
        }
        content_parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
            ChatCompletionRequestMessageContentPartImage {
                image_url: ImageUrl {
                    url: image_data_url(image),
                    detail: Some(ImageDetail::Auto),
                },
            },
        ));

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
            .build()
            .map_err(build_failed)?;

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .build()
            .map_err(build_failed)
    }

    /// 把一个单元序列化为批处理输入文件中的一行
    pub fn bulk_line(&self, index: usize, image: &[u8]) -> OcrResult<String> {
        let body = self.chat_request(image)?;
        let line = BulkRequestLine {
            custom_id: index.to_string(),
            method: "POST",
            url: BULK_ENDPOINT,
            body: &body,
        };
        serde_json::to_string(&line).map_err(|e| {
            OcrError::parse(format!("批处理请求行 #{}", index + 1), e.to_string())
        })
    }
}

/// PNG 数据转为 data URL
pub fn image_data_url(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(png)
    )
}

#[derive(Serialize)]
struct BulkRequestLine<'a> {
    custom_id: String,
    method: &'a str,
    url: &'a str,
    body: &'a CreateChatCompletionRequest,
}

// ========== 批处理输出 ==========

#[derive(Debug, Deserialize)]
struct BulkResponseLine {
    custom_id: String,
    #[serde(default)]
    response: Option<BulkResponse>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    status_code: u16,
    #[serde(default)]
    body: Option<ChatBody>,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// 输出文件中的一条记录
#[derive(Debug)]
pub struct BulkRecord {
    /// 由 `custom_id` 还原的原始索引
    pub index: usize,
    /// 识别结果，或远端给出的错误描述
    pub outcome: Result<Recognition, String>,
}

/// 解析输出文件中的一行
///
/// 行本身损坏或 `custom_id` 不是整数时返回解析错误；
/// 单条请求失败则放在 `outcome` 里交给调用方处理。
pub fn parse_bulk_record(line: &str) -> OcrResult<BulkRecord> {
    let parsed: BulkResponseLine = serde_json::from_str(line)?;

    let index = parsed.custom_id.parse::<usize>().map_err(|_| {
        OcrError::parse(
            "批处理输出",
            format!("custom_id {:?} 不是合法的索引", parsed.custom_id),
        )
    })?;

    if let Some(error) = parsed.error.filter(|e| !e.is_null()) {
        return Ok(BulkRecord {
            index,
            outcome: Err(error.to_string()),
        });
    }

    let outcome = match parsed.response {
        None => Err("缺少 response 字段".to_string()),
        Some(response) if !(200..300).contains(&response.status_code) => {
            Err(format!("HTTP 状态码 {}", response.status_code))
        }
        Some(response) => {
            let body = response.body.unwrap_or(ChatBody {
                choices: Vec::new(),
                usage: None,
            });
            let usage = body.usage.unwrap_or_default();
            match body.choices.into_iter().next().and_then(|c| c.message.content) {
                Some(text) => Ok(Recognition {
                    text: text.trim().to_string(),
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                }),
                None => Err("模型返回内容为空".to_string()),
            }
        }
    };

    Ok(BulkRecord { index, outcome })
}
