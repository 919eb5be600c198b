//! 批处理分块
//!
//! 按顺序把序列化后的请求行装进分块，每块同时受请求数和字节数限制。
//! 单个请求行永远不会被拆开：即使它本身就超过字节上限，也会独占一块。

use tracing::debug;

use crate::config::ChunkLimits;

/// 一个批处理分块
#[derive(Debug, Clone)]
pub struct JobChunk {
    /// 分块序号（从 0 开始）
    pub number: usize,
    indices: Vec<usize>,
    lines: Vec<String>,
    size: usize,
}

impl JobChunk {
    fn new(number: usize) -> Self {
        Self {
            number,
            indices: Vec::new(),
            lines: Vec::new(),
            size: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// 序列化后的字节数（每行包含结尾换行符）
    pub fn size_bytes(&self) -> usize {
        self.size
    }

    /// 分块中各单元的原始索引
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn size_with(&self, line: &str) -> usize {
        self.size + line.len() + 1
    }

    fn push(&mut self, index: usize, line: String) {
        self.size += line.len() + 1;
        self.indices.push(index);
        self.lines.push(line);
    }

    /// 生成上传用的 JSONL 内容
    pub fn to_jsonl(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.size);
        for line in &self.lines {
            payload.extend_from_slice(line.as_bytes());
            payload.push(b'\n');
        }
        payload
    }
}

/// 按上限切分请求行
///
/// `lines` 为 `(原始索引, 请求行)`，必须按输入顺序给出。
pub fn plan_chunks(
    lines: impl IntoIterator<Item = (usize, String)>,
    limits: ChunkLimits,
) -> Vec<JobChunk> {
    let mut chunks = Vec::new();
    let mut current = JobChunk::new(0);

    for (index, line) in lines {
        let over_size = current.size_with(&line) > limits.max_bytes;
        let over_count = current.len() >= limits.max_requests;
        if !current.is_empty() && (over_size || over_count) {
            debug!(
                "创建新分块: 第 {} 块共 {} 个请求，{} 字节",
                current.number + 1,
                current.len(),
                current.size_bytes()
            );
            let next = JobChunk::new(current.number + 1);
            chunks.push(std::mem::replace(&mut current, next));
        }
        current.push(index, line);
    }

    if !current.is_empty() {
        debug!(
            "最后一块: 第 {} 块共 {} 个请求，{} 字节",
            current.number + 1,
            current.len(),
            current.size_bytes()
        );
        chunks.push(current);
    }

    chunks
}
