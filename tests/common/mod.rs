//! 测试用的模拟识别客户端
//!
//! 图片内容是 `unit-{index}`，模拟客户端据此得知自己在识别哪个单元。
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use subtitle_ocr::error::{OcrError, OcrResult};
use subtitle_ocr::models::{JobSnapshot, JobStatus, RecognitionUnit};
use subtitle_ocr::services::{ProgressEvent, ProgressSink};
use subtitle_ocr::{Recognition, RecognitionClient};

pub const PROMPT_TOKENS: u64 = 10;
pub const COMPLETION_TOKENS: u64 = 2;

/// 生成 n 个单元，第 i 个的时间轴为 [i 秒, i 秒 + 800 毫秒]
pub fn units(n: usize) -> Vec<RecognitionUnit> {
    (0..n)
        .map(|i| {
            RecognitionUnit::new(
                i,
                format!("unit-{}", i).into_bytes(),
                Duration::from_secs(i as u64),
                Duration::from_secs(i as u64) + Duration::from_millis(800),
            )
        })
        .collect()
}

pub fn expected_text(index: usize) -> String {
    format!("line {}", index)
}

fn index_of(image: &[u8]) -> usize {
    std::str::from_utf8(image)
        .ok()
        .and_then(|s| s.strip_prefix("unit-"))
        .and_then(|s| s.parse().ok())
        .expect("测试图片格式应为 unit-N")
}

#[derive(Debug)]
struct MockJob {
    number: usize,
    input_file_id: String,
    script: VecDeque<String>,
    current: String,
}

/// 可编排行为的模拟客户端
#[derive(Default)]
pub struct MockClient {
    // 即时模式
    delays: Mutex<HashMap<usize, Duration>>,
    default_delay: Mutex<Duration>,
    failures: Mutex<HashSet<usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Mutex<Vec<usize>>,

    // 批处理模式
    files: Mutex<HashMap<String, Vec<usize>>>,
    jobs: Mutex<HashMap<String, MockJob>>,
    scripts: Mutex<HashMap<usize, Vec<&'static str>>>,
    output_overrides: Mutex<HashMap<usize, String>>,
    uploads: AtomicUsize,
    cancels: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    delete_failures: Mutex<HashSet<String>>,
    call_counts: Mutex<HashMap<&'static str, usize>>,
    call_failures: Mutex<HashSet<(&'static str, usize)>>,
}

impl MockClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_delay(&self, index: usize, delay: Duration) {
        self.delays.lock().unwrap().insert(index, delay);
    }

    pub fn set_default_delay(&self, delay: Duration) {
        *self.default_delay.lock().unwrap() = delay;
    }

    pub fn fail_on(&self, index: usize) {
        self.failures.lock().unwrap().insert(index);
    }

    /// 第 `job` 个任务依次返回的状态，最后一个状态会一直保持
    pub fn script_job(&self, job: usize, statuses: Vec<&'static str>) {
        self.scripts.lock().unwrap().insert(job, statuses);
    }

    /// 替换第 `job` 个任务的输出文件内容
    pub fn override_output(&self, job: usize, content: String) {
        self.output_overrides.lock().unwrap().insert(job, content);
    }

    /// 让某个远端操作的第 `nth` 次调用（从 0 开始）失败
    ///
    /// `operation` 为 `upload` / `schedule` / `status` / `fetch`。
    pub fn fail_call(&self, operation: &'static str, nth: usize) {
        self.call_failures.lock().unwrap().insert((operation, nth));
    }

    fn check_call(&self, operation: &'static str) -> OcrResult<()> {
        let nth = {
            let mut counts = self.call_counts.lock().unwrap();
            let count = counts.entry(operation).or_insert(0);
            *count += 1;
            *count - 1
        };
        if self.call_failures.lock().unwrap().contains(&(operation, nth)) {
            return Err(OcrError::transport(operation, "boom"));
        }
        Ok(())
    }

    pub fn fail_delete(&self, file_id: &str) {
        self.delete_failures
            .lock()
            .unwrap()
            .insert(file_id.to_string());
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<usize> {
        self.started.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// 每个上传文件中的 custom_id，按上传顺序排列
    pub fn uploaded_chunks(&self) -> Vec<Vec<usize>> {
        let files = self.files.lock().unwrap();
        (0..self.uploads())
            .map(|n| files[&format!("file-in-{}", n)].clone())
            .collect()
    }

    pub fn cancels(&self) -> Vec<String> {
        let mut cancels = self.cancels.lock().unwrap().clone();
        cancels.sort();
        cancels
    }

    pub fn deletes(&self) -> Vec<String> {
        let mut deletes = self.deletes.lock().unwrap().clone();
        deletes.sort();
        deletes
    }

    fn output_line(index: usize) -> String {
        json!({
            "id": format!("req-{}", index),
            "custom_id": index.to_string(),
            "response": {
                "status_code": 200,
                "body": {
                    "choices": [{"index": 0, "message": {"role": "assistant", "content": expected_text(index)}}],
                    "usage": {"prompt_tokens": PROMPT_TOKENS, "completion_tokens": COMPLETION_TOKENS}
                }
            },
            "error": null
        })
        .to_string()
    }

    /// 构造一行输出记录，测试可用来拼接自定义输出
    pub fn output_line_for(index: usize) -> String {
        Self::output_line(index)
    }
}

#[async_trait]
impl RecognitionClient for MockClient {
    async fn recognize(&self, image: &[u8]) -> OcrResult<Recognition> {
        let index = index_of(image);
        self.started.lock().unwrap().push(index);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(&index)
            .copied()
            .unwrap_or(*self.default_delay.lock().unwrap());
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failures.lock().unwrap().contains(&index) {
            return Err(OcrError::transport("模拟识别", "模型拒绝了请求"));
        }
        Ok(Recognition {
            text: expected_text(index),
            prompt_tokens: PROMPT_TOKENS,
            completion_tokens: COMPLETION_TOKENS,
        })
    }

    async fn upload_bulk_input(&self, _name: &str, payload: Vec<u8>) -> OcrResult<String> {
        self.check_call("upload")?;
        let content = String::from_utf8(payload).expect("上传内容应为 UTF-8");
        let indices = content
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).expect("每行应为 JSON");
                value["custom_id"]
                    .as_str()
                    .and_then(|id| id.parse().ok())
                    .expect("custom_id 应为索引")
            })
            .collect();

        let number = self.uploads.fetch_add(1, Ordering::SeqCst);
        let file_id = format!("file-in-{}", number);
        self.files.lock().unwrap().insert(file_id.clone(), indices);
        Ok(file_id)
    }

    async fn schedule_job(&self, input_file_id: &str) -> OcrResult<String> {
        self.check_call("schedule")?;
        let mut jobs = self.jobs.lock().unwrap();
        let number = jobs.len();
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_else(|| vec!["in_progress", "completed"]);

        let job_id = format!("batch-{}", number);
        jobs.insert(
            job_id.clone(),
            MockJob {
                number,
                input_file_id: input_file_id.to_string(),
                script: script.into_iter().map(String::from).collect(),
                current: "validating".to_string(),
            },
        );
        Ok(job_id)
    }

    async fn job_status(&self, job_id: &str) -> OcrResult<JobSnapshot> {
        self.check_call("status")?;
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| OcrError::transport("模拟轮询", format!("未知任务 {}", job_id)))?;
        if let Some(next) = job.script.pop_front() {
            job.current = next;
        }

        let mut snapshot = JobSnapshot::with_status(JobStatus::parse(job_id, &job.current)?);
        match snapshot.status {
            JobStatus::Completed => {
                snapshot.output_file_id = Some(format!("file-out-{}", job.number));
            }
            JobStatus::Failed => {
                snapshot.error_file_id = Some(format!("file-err-{}", job.number));
                snapshot.detail = Some("输入文件校验失败".to_string());
            }
            _ => {}
        }
        Ok(snapshot)
    }

    async fn cancel_job(&self, job_id: &str) -> OcrResult<JobStatus> {
        self.cancels.lock().unwrap().push(job_id.to_string());
        if let Some(job) = self.jobs.lock().unwrap().get_mut(job_id) {
            job.script.clear();
            job.current = "cancelling".to_string();
        }
        Ok(JobStatus::Cancelling)
    }

    async fn fetch_output(&self, file_id: &str) -> OcrResult<Vec<u8>> {
        self.check_call("fetch")?;
        let number: usize = file_id
            .strip_prefix("file-out-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| OcrError::transport("模拟下载", format!("未知文件 {}", file_id)))?;

        if let Some(content) = self.output_overrides.lock().unwrap().get(&number) {
            return Ok(content.clone().into_bytes());
        }

        let jobs = self.jobs.lock().unwrap();
        let job = jobs
            .values()
            .find(|job| job.number == number)
            .ok_or_else(|| OcrError::transport("模拟下载", format!("未知任务 #{}", number)))?;
        let files = self.files.lock().unwrap();
        let indices = files.get(&job.input_file_id).cloned().unwrap_or_default();

        // 输出顺序与输入相反，验证结果是按 custom_id 放回原位的
        let content: Vec<String> = indices.into_iter().rev().map(Self::output_line).collect();
        Ok((content.join("\n") + "\n").into_bytes())
    }

    async fn delete_artifact(&self, file_id: &str) -> OcrResult<bool> {
        self.deletes.lock().unwrap().push(file_id.to_string());
        if self.delete_failures.lock().unwrap().contains(file_id) {
            return Err(OcrError::transport("模拟删除", "权限不足"));
        }
        Ok(true)
    }
}

/// 记录所有进度事件
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}
