//! 识别单元与有序结果集

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{OcrError, OcrResult};

/// 一个待识别的字幕图片
///
/// 创建后不可变，核心只读取 `image`，其余字段原样带到结果里。
#[derive(Debug, Clone)]
pub struct RecognitionUnit {
    /// 在输入中的位置（从 0 开始）
    pub index: usize,
    /// PNG 编码后的图片数据
    pub image: Arc<[u8]>,
    pub start_time: Duration,
    pub end_time: Duration,
}

impl RecognitionUnit {
    pub fn new(
        index: usize,
        image: impl Into<Arc<[u8]>>,
        start_time: Duration,
        end_time: Duration,
    ) -> Self {
        Self {
            index,
            image: image.into(),
            start_time,
            end_time,
        }
    }

    /// 由识别文本和 token 计数生成对应的结果
    pub fn complete(&self, text: String, prompt_tokens: u64, completion_tokens: u64) -> RecognitionResult {
        RecognitionResult {
            index: self.index,
            start_time: self.start_time,
            end_time: self.end_time,
            text,
            prompt_tokens,
            completion_tokens,
        }
    }
}

/// 单张图片的识别结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub index: usize,
    pub start_time: Duration,
    pub end_time: Duration,
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
}

/// 并发安全的 token 累加器
#[derive(Debug, Default)]
pub struct TokenCounter {
    prompt: AtomicU64,
    completion: AtomicU64,
}

impl TokenCounter {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt.fetch_add(prompt, Ordering::Relaxed);
        self.completion.fetch_add(completion, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TokenUsage {
        TokenUsage {
            prompt: self.prompt.load(Ordering::Relaxed),
            completion: self.completion.load(Ordering::Relaxed),
        }
    }
}

/// 完整的有序结果集
///
/// 第 i 个元素一定对应输入中的第 i 个单元。
#[derive(Debug, Clone, Default)]
pub struct OrderedResultSet {
    pub results: Vec<RecognitionResult>,
    pub usage: TokenUsage,
}

impl OrderedResultSet {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecognitionResult> {
        self.results.iter()
    }
}

/// 按输入位置排列的结果槽位
///
/// 每个槽位只能写一次；越界或重复写入都是错误。
#[derive(Debug)]
pub struct ResultSlots {
    slots: Vec<Option<RecognitionResult>>,
    filled: usize,
}

impl ResultSlots {
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
            filled: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    /// 写入一个结果
    pub fn fill(&mut self, result: RecognitionResult) -> OcrResult<()> {
        let len = self.slots.len();
        let slot = self.slots.get_mut(result.index).ok_or_else(|| {
            OcrError::parse(
                "结果槽位",
                format!("索引 {} 超出范围 [0, {})", result.index, len),
            )
        })?;
        if slot.is_some() {
            return Err(OcrError::parse(
                "结果槽位",
                format!("索引 {} 重复出现", result.index),
            ));
        }
        *slot = Some(result);
        self.filled += 1;
        Ok(())
    }

    /// 尚未填充的索引
    pub fn missing(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .collect()
    }

    /// 所有槽位都已填充时才返回完整结果集
    pub fn into_complete(self, usage: TokenUsage) -> OcrResult<OrderedResultSet> {
        if !self.is_complete() {
            let missing = self.missing();
            return Err(OcrError::parse(
                "结果集",
                format!(
                    "{} 个单元没有结果 (首个缺失索引: {})",
                    missing.len(),
                    missing[0]
                ),
            ));
        }
        let results = self.slots.into_iter().flatten().collect();
        Ok(OrderedResultSet { results, usage })
    }
}
