//! # Subtitle OCR
//!
//! 用视觉大模型把图片字幕（PGS / VobSub 导出的图片）识别为 SRT 字幕
//!
//! ## 架构设计
//!
//! 本系统采用四层架构：
//!
//! ### ① 客户端层（Clients）
//! - `clients/` - 与远端模型服务交互，只暴露能力
//! - `RecognitionClient` - 识别单张图片 + 批处理文件 / 任务管理
//! - `OpenAiRecognitionClient` - 兼容 OpenAI API 的实现
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，不关心流程
//! - `RequestBuilder` - 构建识别请求、序列化 / 解析批处理行
//! - `ProgressSink` - 进度事件
//! - `SrtWriter` - 写 .srt 能力
//!
//! ### ③ 编排层（Orchestration）
//! - `orchestrator/interactive` - 即时识别，有界并发 + 有序汇总
//! - `orchestrator/batch` - 批处理，分块 / 轮询 / 取回 / 清理
//!
//! ### ④ 应用层（App）
//! - `app` - 读取清单、选择模式、写出字幕
//!
//! ## 模块结构

pub mod app;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use app::App;
pub use clients::{OpenAiRecognitionClient, Recognition, RecognitionClient};
pub use config::{ChunkLimits, Config};
pub use error::{OcrError, OcrResult};
pub use models::{JobStatus, OrderedResultSet, RecognitionResult, RecognitionUnit, TokenUsage};
pub use orchestrator::{run_ocr, BatchOrchestrator, InteractiveDispatcher};
pub use services::{NoopProgress, ProgressEvent, ProgressSink};
