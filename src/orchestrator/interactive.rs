//! 即时识别调度器 - 编排层
//!
//! ## 职责
//!
//! 用固定数量的工作任务并发调用识别接口，把乱序完成的结果按原始位置排好。
//!
//! ## 流程
//!
//! 1. **投喂**：一个投喂任务把单元依次放进有界队列，取消后立即停止
//! 2. **识别**：W 个工作任务共享队列，每个任务一次只处理一个单元
//! 3. **汇总**：任一工作任务失败即取消本次运行，不再发出新请求；
//!    已在途的请求允许完成，但结果和 token 都会被丢弃
//! 4. **校验**：只有全部槽位都填满才返回结果集
//!
//! 多个任务同时失败时只返回最先观察到的那个错误。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::clients::RecognitionClient;
use crate::error::{OcrError, OcrResult};
use crate::models::unit::{OrderedResultSet, RecognitionResult, RecognitionUnit, ResultSlots, TokenCounter};
use crate::services::progress::{ProgressEvent, ProgressSink};
use crate::services::srt_writer::format_timestamp;

/// 即时识别调度器
pub struct InteractiveDispatcher {
    client: Arc<dyn RecognitionClient>,
    progress: Arc<dyn ProgressSink>,
    workers: usize,
    debug: bool,
}

impl InteractiveDispatcher {
    pub fn new(
        client: Arc<dyn RecognitionClient>,
        progress: Arc<dyn ProgressSink>,
        workers: usize,
    ) -> Self {
        Self {
            client,
            progress,
            workers,
            debug: false,
        }
    }

    /// 打印每条识别结果
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// 识别全部单元
    ///
    /// # 参数
    /// - `units`: 按输入顺序排列的识别单元
    /// - `cancel`: 外部取消信号
    ///
    /// # 返回
    /// 成功时返回与输入等长、顺序一致的结果集
    pub async fn run(
        &self,
        units: &[RecognitionUnit],
        cancel: &CancellationToken,
    ) -> OcrResult<OrderedResultSet> {
        if self.workers == 0 {
            return Err(OcrError::Config("并发数必须大于 0".to_string()));
        }
        let total = units.len();
        if total == 0 {
            return Ok(OrderedResultSet::default());
        }

        let worker_count = self.workers.min(total);
        info!("🚀 即时识别开始: {} 张图片, {} 个并发", total, worker_count);

        // 本次运行自己的取消信号：外部取消会传递进来，内部失败不会影响外部
        let run_token = cancel.child_token();
        let counter = Arc::new(TokenCounter::default());
        let completed = Arc::new(AtomicUsize::new(0));

        let (tx, rx) = mpsc::channel::<RecognitionUnit>(worker_count);
        let feeder = tokio::spawn(feed(units.to_vec(), tx, run_token.clone()));
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                queue: rx.clone(),
                client: self.client.clone(),
                progress: self.progress.clone(),
                counter: counter.clone(),
                completed: completed.clone(),
                total,
                token: run_token.clone(),
                debug: self.debug,
            };
            workers.spawn(worker.run());
        }

        let mut slots = ResultSlots::new(total);
        let mut first_error: Option<OcrError> = None;

        while let Some(joined) = workers.join_next().await {
            let outcome = joined
                .map_err(|e| OcrError::transport("识别工作任务", e))
                .and_then(|results| results);
            match outcome {
                Ok(results) => {
                    for result in results {
                        if let Err(e) = slots.fill(result) {
                            run_token.cancel();
                            first_error.get_or_insert(e);
                        }
                    }
                }
                Err(e) => {
                    // 让投喂任务立刻停止，其余工作任务不再领取新单元
                    run_token.cancel();
                    if first_error.is_none() {
                        error!("❌ 工作任务失败: {}", e);
                        first_error = Some(e);
                    } else {
                        debug!("另一个工作任务也失败了: {}", e);
                    }
                }
            }
        }

        run_token.cancel();
        if let Err(e) = feeder.await {
            debug!("投喂任务异常退出: {}", e);
        }

        let usage = counter.snapshot();
        info!(
            "模型 token 用量: prompt={}, completion={}",
            usage.prompt, usage.completion
        );

        if let Some(e) = first_error {
            return Err(e);
        }
        // 全部完成后才收到的取消不影响结果
        if !slots.is_complete() && cancel.is_cancelled() {
            return Err(OcrError::cancelled("即时识别"));
        }
        slots.into_complete(usage)
    }
}

/// 依次投喂单元，取消后停止（不视为错误）
async fn feed(
    units: Vec<RecognitionUnit>,
    tx: mpsc::Sender<RecognitionUnit>,
    token: CancellationToken,
) {
    for unit in units {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("投喂任务收到取消信号，停止投喂");
                return;
            }
            sent = tx.send(unit) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

struct Worker {
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<RecognitionUnit>>>,
    client: Arc<dyn RecognitionClient>,
    progress: Arc<dyn ProgressSink>,
    counter: Arc<TokenCounter>,
    completed: Arc<AtomicUsize>,
    total: usize,
    token: CancellationToken,
    debug: bool,
}

impl Worker {
    async fn run(self) -> OcrResult<Vec<RecognitionResult>> {
        let mut results = Vec::new();

        loop {
            let next = {
                let mut queue = self.queue.lock().await;
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => None,
                    unit = queue.recv() => unit,
                }
            };
            let Some(unit) = next else {
                break;
            };

            let recognition = match self.client.recognize(&unit.image).await {
                Ok(recognition) => recognition,
                Err(e) => {
                    self.token.cancel();
                    return Err(OcrError::recognition(unit.index, e));
                }
            };

            // 在途期间运行已被取消：结果作废
            if self.token.is_cancelled() {
                debug!(
                    "[工作任务 {}] 丢弃第 {} 张图片的结果（运行已取消）",
                    self.id,
                    unit.index + 1
                );
                break;
            }

            self.counter
                .add(recognition.prompt_tokens, recognition.completion_tokens);
            let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
            self.progress.report(ProgressEvent::UnitCompleted {
                index: unit.index,
                completed,
                total: self.total,
            });

            if self.debug {
                info!(
                    "#{} {} --> {}\n{}",
                    unit.index + 1,
                    format_timestamp(unit.start_time),
                    format_timestamp(unit.end_time),
                    recognition.text
                );
            }

            results.push(unit.complete(
                recognition.text,
                recognition.prompt_tokens,
                recognition.completion_tokens,
            ));
        }

        Ok(results)
    }
}
