//! 批处理编排器 - 编排层
//!
//! ## 职责
//!
//! 把全部识别请求交给远端批处理接口，并负责远端资源的完整生命周期。
//!
//! ## 流程
//!
//! 1. **分块**：按请求数 / 字节数上限切分（见 `chunking`）
//! 2. **上传**：每块上传为一个 JSONL 文件
//! 3. **调度**：每个文件创建一个远端任务
//! 4. **轮询**：固定间隔查询所有任务，同时响应取消与超时
//! 5. **取回**：下载输出文件，按 `custom_id` 放回原始位置
//! 6. **清理**：无论成功与否，删除本次创建的所有远端文件
//!
//! 任一任务进入 `failed` / `expired` / `cancelled` 都会中止整次运行，
//! 中止时其余未结束的任务会收到取消请求。清理和取消的失败只记录日志，
//! 不会覆盖原始错误。

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::RecognitionClient;
use crate::config::{ChunkLimits, Config};
use crate::error::{OcrError, OcrResult};
use crate::models::job::{JobSnapshot, JobStatus, RemoteJob};
use crate::models::unit::{OrderedResultSet, RecognitionUnit, ResultSlots, TokenUsage};
use crate::orchestrator::chunking::{plan_chunks, JobChunk};
use crate::services::progress::{ProgressEvent, ProgressSink};
use crate::services::request_builder::{parse_bulk_record, RequestBuilder};
use crate::services::srt_writer::format_timestamp;

/// 清理结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub attempted: usize,
    pub failed: usize,
}

/// 本次运行在远端创建的资源
#[derive(Debug, Default)]
struct RunState {
    input_files: Vec<String>,
    jobs: Vec<RemoteJob>,
    /// 已解析结果的 token 用量，中途失败时也保留
    usage: TokenUsage,
}

impl RunState {
    /// 需要删除的远端文件，每个 ID 只出现一次
    fn artifacts(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let outputs = self.jobs.iter().flat_map(|job| {
            job.output_file_id
                .iter()
                .chain(job.error_file_id.iter())
                .cloned()
        });
        self.input_files
            .iter()
            .cloned()
            .chain(outputs)
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }
}

/// 批处理编排器
pub struct BatchOrchestrator {
    client: Arc<dyn RecognitionClient>,
    progress: Arc<dyn ProgressSink>,
    builder: RequestBuilder,
    limits: ChunkLimits,
    poll_interval: Duration,
    max_wait: Option<Duration>,
    debug: bool,
}

impl BatchOrchestrator {
    pub fn new(
        client: Arc<dyn RecognitionClient>,
        progress: Arc<dyn ProgressSink>,
        builder: RequestBuilder,
        limits: ChunkLimits,
    ) -> Self {
        Self {
            client,
            progress,
            builder,
            limits,
            poll_interval: Duration::from_secs(60),
            max_wait: None,
            debug: false,
        }
    }

    /// 按配置创建
    pub fn from_config(
        config: &Config,
        client: Arc<dyn RecognitionClient>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self::new(
            client,
            progress,
            RequestBuilder::new(&config.model, config.italic),
            config.chunk_limits,
        )
        .with_poll_interval(config.poll_interval)
        .with_max_wait(config.max_wait)
        .with_debug(config.debug)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// 以批处理方式识别全部单元
    pub async fn run(
        &self,
        units: &[RecognitionUnit],
        cancel: &CancellationToken,
    ) -> OcrResult<OrderedResultSet> {
        if units.is_empty() {
            return Ok(OrderedResultSet::default());
        }
        if self.poll_interval.is_zero() {
            return Err(OcrError::Config("轮询间隔必须大于 0".to_string()));
        }

        let chunks = self.plan(units)?;
        info!(
            "📦 批处理开始: {} 张图片, 分为 {} 块",
            units.len(),
            chunks.len()
        );

        let mut state = RunState::default();
        let outcome = self.drive(units, &chunks, &mut state, cancel).await;

        if let Err(e) = &outcome {
            warn!("⚠️ 批处理中止: {}", e);
            self.cancel_pending(&mut state).await;
        }
        let report = self.cleanup(&state).await;
        if report.failed > 0 {
            warn!(
                "⚠️ {} 个远端文件未能删除 (共 {} 个)",
                report.failed, report.attempted
            );
        }

        info!(
            "模型 token 用量: prompt={}, completion={}",
            state.usage.prompt, state.usage.completion
        );
        outcome
    }

    /// 序列化并分块
    fn plan(&self, units: &[RecognitionUnit]) -> OcrResult<Vec<JobChunk>> {
        let lines = units
            .iter()
            .map(|unit| {
                self.builder
                    .bulk_line(unit.index, &unit.image)
                    .map(|line| (unit.index, line))
            })
            .collect::<OcrResult<Vec<_>>>()?;
        Ok(plan_chunks(lines, self.limits))
    }

    async fn drive(
        &self,
        units: &[RecognitionUnit],
        chunks: &[JobChunk],
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> OcrResult<OrderedResultSet> {
        self.upload_chunks(chunks, state, cancel).await?;
        self.schedule_jobs(state, cancel).await?;
        self.wait_for_jobs(state, cancel).await?;
        self.collect_results(units, state, cancel).await
    }

    async fn upload_chunks(
        &self,
        chunks: &[JobChunk],
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> OcrResult<()> {
        for chunk in chunks {
            let name = format!("subtitle-ocr-chunk-{:04}.jsonl", chunk.number + 1);
            let file_id = guarded(
                cancel,
                "上传分块",
                self.client.upload_bulk_input(&name, chunk.to_jsonl()),
            )
            .await
            .map_err(|e| in_chunk(e, chunk.number))?;

            info!(
                "✓ 第 {} 块已上传: {} ({} 个请求, {} 字节)",
                chunk.number + 1,
                file_id,
                chunk.len(),
                chunk.size_bytes()
            );
            state.input_files.push(file_id);
        }
        Ok(())
    }

    async fn schedule_jobs(&self, state: &mut RunState, cancel: &CancellationToken) -> OcrResult<()> {
        for (chunk, file_id) in state.input_files.iter().enumerate() {
            let job_id = guarded(cancel, "创建任务", self.client.schedule_job(file_id))
                .await
                .map_err(|e| in_chunk(e, chunk))?;

            info!("✓ 第 {} 块任务已创建: {} (文件 {})", chunk + 1, job_id, file_id);
            state
                .jobs
                .push(RemoteJob::new(chunk, job_id));
        }
        Ok(())
    }

    /// 轮询直到全部完成，或任一任务失败 / 被取消 / 超时
    async fn wait_for_jobs(&self, state: &mut RunState, cancel: &CancellationToken) -> OcrResult<()> {
        let start = Instant::now();
        let deadline = self.max_wait.map(|max_wait| start + max_wait);
        let mut ticker = interval_at(start + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OcrError::cancelled("等待批处理")),
                _ = deadline_reached(deadline) => return Err(OcrError::timed_out("等待批处理")),
                _ = ticker.tick() => {}
            }

            for job in state.jobs.iter_mut() {
                if job.status.is_terminal() {
                    continue;
                }

                let snapshot = guarded(cancel, "轮询任务", self.client.job_status(&job.job_id))
                    .await
                    .map_err(|e| in_chunk(e, job.chunk))?;

                let from = job.status;
                if !job.apply(snapshot) {
                    continue;
                }
                self.progress.report(ProgressEvent::JobStatusChanged {
                    chunk: job.chunk,
                    job_id: job.job_id.clone(),
                    from,
                    to: job.status,
                });

                if job.status.is_failure() {
                    return Err(OcrError::JobTerminal {
                        chunk: job.chunk,
                        job_id: job.job_id.clone(),
                        status: job.status,
                        detail: job
                            .detail
                            .clone()
                            .unwrap_or_else(|| "无详细信息".to_string()),
                    });
                }
            }

            let done = state
                .jobs
                .iter()
                .filter(|job| job.status == JobStatus::Completed)
                .count();
            debug!(
                "{:?} | {}/{} 个任务已完成",
                start.elapsed(),
                done,
                state.jobs.len()
            );
            if done == state.jobs.len() {
                info!("✅ 全部批处理任务已完成，用时 {:?}", start.elapsed());
                return Ok(());
            }
        }
    }

    /// 下载并解析所有输出文件
    async fn collect_results(
        &self,
        units: &[RecognitionUnit],
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> OcrResult<OrderedResultSet> {
        let mut slots = ResultSlots::new(units.len());

        for job in &state.jobs {
            let output_file_id = job.output_file_id.as_deref().ok_or_else(|| {
                OcrError::parse(
                    format!("第 {} 块", job.chunk + 1),
                    format!(
                        "任务 {} 已完成但没有输出文件 (错误文件: {})",
                        job.job_id,
                        job.error_file_id.as_deref().unwrap_or("无")
                    ),
                )
            })?;

            let raw = guarded(cancel, "下载结果", self.client.fetch_output(output_file_id))
                .await
                .map_err(|e| in_chunk(e, job.chunk))?;
            let content = String::from_utf8(raw).map_err(|e| {
                OcrError::parse(format!("第 {} 块输出", job.chunk + 1), e.to_string())
            })?;

            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let record = parse_bulk_record(line).map_err(|e| {
                    OcrError::parse(
                        format!("第 {} 块输出第 {} 行", job.chunk + 1, line_no + 1),
                        e.to_string(),
                    )
                })?;

                let unit = units.get(record.index).ok_or_else(|| {
                    OcrError::parse(
                        format!("第 {} 块输出第 {} 行", job.chunk + 1, line_no + 1),
                        format!("索引 {} 超出范围 [0, {})", record.index, units.len()),
                    )
                })?;
                let recognition = record
                    .outcome
                    .map_err(|message| OcrError::recognition(record.index, message))?;

                state.usage.prompt += recognition.prompt_tokens;
                state.usage.completion += recognition.completion_tokens;

                if self.debug {
                    info!(
                        "#{} {} --> {} (第 {} 块)\n{}",
                        unit.index + 1,
                        format_timestamp(unit.start_time),
                        format_timestamp(unit.end_time),
                        job.chunk + 1,
                        recognition.text
                    );
                }

                slots.fill(unit.complete(
                    recognition.text,
                    recognition.prompt_tokens,
                    recognition.completion_tokens,
                ))?;
            }
        }

        if !slots.is_complete() {
            let missing = slots.missing();
            let error_files: Vec<&str> = state
                .jobs
                .iter()
                .filter_map(|job| job.error_file_id.as_deref())
                .collect();
            return Err(OcrError::parse(
                "批处理结果",
                format!(
                    "{} 个单元没有返回结果 (首个缺失: 第 {} 张), 错误文件: {:?}",
                    missing.len(),
                    missing[0] + 1,
                    error_files
                ),
            ));
        }

        slots.into_complete(state.usage)
    }

    /// 中止时取消所有仍在运行的任务
    async fn cancel_pending(&self, state: &mut RunState) {
        let pending: Vec<usize> = state
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.needs_cancel())
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return;
        }

        let outcomes = join_all(
            pending
                .iter()
                .map(|&i| self.client.cancel_job(&state.jobs[i].job_id)),
        )
        .await;

        for (i, outcome) in pending.into_iter().zip(outcomes) {
            let job = &mut state.jobs[i];
            match outcome {
                Ok(status) => {
                    info!(
                        "第 {} 块任务 {} 已请求取消，当前状态: {}",
                        job.chunk + 1,
                        job.job_id,
                        status
                    );
                    job.apply(JobSnapshot::with_status(status));
                }
                Err(e) => warn!(
                    "⚠️ 第 {} 块任务 {} 取消失败: {}",
                    job.chunk + 1,
                    job.job_id,
                    e
                ),
            }
        }
    }

    /// 删除本次运行创建的远端文件，每个文件只尝试一次
    async fn cleanup(&self, state: &RunState) -> CleanupReport {
        let artifacts = state.artifacts();
        let outcomes = join_all(
            artifacts
                .iter()
                .map(|file_id| self.client.delete_artifact(file_id)),
        )
        .await;

        let mut report = CleanupReport {
            attempted: artifacts.len(),
            failed: 0,
        };
        for (file_id, outcome) in artifacts.iter().zip(outcomes) {
            match outcome {
                Ok(true) => debug!("🗑️ 已删除远端文件 {}", file_id),
                Ok(false) => {
                    warn!("⚠️ 远端文件 {} 未被删除", file_id);
                    report.failed += 1;
                }
                Err(e) => {
                    warn!("⚠️ 删除远端文件 {} 失败: {}", file_id, e);
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// 与取消信号竞争执行一次远端调用
async fn guarded<T>(
    cancel: &CancellationToken,
    stage: &'static str,
    call: impl Future<Output = OcrResult<T>>,
) -> OcrResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OcrError::cancelled(stage)),
        result = call => result,
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// 给远端调用错误补上分块信息
fn in_chunk(err: OcrError, chunk: usize) -> OcrError {
    match err {
        OcrError::Transport { operation, source } => OcrError::Transport {
            operation: format!("{}, 第 {} 块", operation, chunk + 1),
            source,
        },
        other => other,
    }
}
