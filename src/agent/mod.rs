//! Agent 层
//!
//! 所有处理能力实现 Agent trait（process / can_handle / status / shutdown），
//! 由 AgentRegistry 按注册顺序解析，AgentExecutor 负责超时、panic 捕获与审计日志。

pub mod classification;
pub mod collaborators;
pub mod document;
pub mod executor;
pub mod extraction;
pub mod feedback;
pub mod mock;
pub mod ocr;
pub mod registry;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::{AgentType, Document, DocumentProcessingState, ProcessingError, ProcessingStage};

pub use classification::ClassificationAgent;
pub use collaborators::{
    Classification, Classifier, Extraction, Extractor, InMemoryReviewQueue, KeywordClassifier,
    OcrBackend, OcrOutput, PatternExtractor, PlainTextOcr, ReviewQueue, ReviewRequest,
};
pub use document::DocumentAgent;
pub use executor::AgentExecutor;
pub use extraction::ExtractionAgent;
pub use feedback::FeedbackAgent;
pub use mock::ScriptedAgent;
pub use ocr::OcrAgent;
pub use registry::AgentRegistry;

pub const AGENT_UNAVAILABLE: &str = "AGENT_UNAVAILABLE";

/// 每次调用附带的上下文：目标阶段、超时、所需置信度与完整状态快照
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub stage: ProcessingStage,
    pub timeout: Duration,
    pub required_confidence: f64,
    pub state: DocumentProcessingState,
}

/// 成功产出（失败时作为部分产出保留）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
    pub data: Option<Value>,
    pub confidence: Option<f64>,
    pub metadata: Map<String, Value>,
}

impl AgentOutput {
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Agent 返回值：成功与失败是互斥的两种形态
#[derive(Debug, Clone, PartialEq)]
pub enum AgentResult {
    Success(AgentOutput),
    Failure {
        error: ProcessingError,
        partial: AgentOutput,
    },
}

impl AgentResult {
    pub fn success(data: Value, confidence: f64) -> Self {
        Self::Success(AgentOutput::default().with_data(data).with_confidence(confidence))
    }

    pub fn failure(error: ProcessingError) -> Self {
        Self::Failure {
            error,
            partial: AgentOutput::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AgentResult::Success(_))
    }

    /// 无论成败都要合并进状态的部分
    pub fn output(&self) -> &AgentOutput {
        match self {
            AgentResult::Success(output) => output,
            AgentResult::Failure { partial, .. } => partial,
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        match self {
            AgentResult::Success(output) => output.confidence,
            AgentResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ProcessingError> {
        match self {
            AgentResult::Failure { error, .. } => Some(error),
            AgentResult::Success(_) => None,
        }
    }
}

impl From<Result<AgentOutput, ProcessingError>> for AgentResult {
    fn from(result: Result<AgentOutput, ProcessingError>) -> Self {
        match result {
            Ok(output) => AgentResult::Success(output),
            Err(error) => AgentResult::failure(error),
        }
    }
}

/// Agent 负载快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    pub available: bool,
    pub busy: bool,
    /// 正在处理的调用数
    pub queue: usize,
}

/// Agent trait：能力声明 + 异步处理
#[async_trait]
pub trait Agent: Send + Sync {
    /// 实例名（日志与历史记录用）
    fn name(&self) -> &str;

    fn agent_type(&self) -> AgentType;

    /// 是否愿意处理该阶段的这份文档
    fn can_handle(&self, stage: ProcessingStage, document: &Document) -> bool;

    async fn process(&self, document: &Document, options: &AgentOptions) -> AgentResult;

    fn status(&self) -> AgentStatus {
        AgentStatus {
            available: true,
            busy: false,
            queue: 0,
        }
    }

    /// 进程退出时释放资源；不是按文档调用
    async fn shutdown(&self) {}
}

/// 内置 Agent 共用的负载计数与关闭标记
#[derive(Debug, Default)]
pub struct AgentLoad {
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

/// 进入处理时获得，drop 时计数回落
pub struct LoadGuard<'a> {
    load: &'a AgentLoad,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.load.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AgentLoad {
    /// 已关闭时返回可重试的 AGENT_UNAVAILABLE
    pub fn enter(&self, agent: &str) -> Result<LoadGuard<'_>, ProcessingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProcessingError::retryable(
                AGENT_UNAVAILABLE,
                format!("agent '{agent}' has been shut down"),
            ));
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(LoadGuard { load: self })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn status(&self) -> AgentStatus {
        let queue = self.in_flight.load(Ordering::SeqCst);
        AgentStatus {
            available: !self.closed.load(Ordering::SeqCst),
            busy: queue > 0,
            queue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_guard_tracks_in_flight() {
        let load = AgentLoad::default();
        {
            let _a = load.enter("ocr").unwrap();
            let _b = load.enter("ocr").unwrap();
            let status = load.status();
            assert!(status.busy);
            assert_eq!(status.queue, 2);
        }
        assert_eq!(load.status().queue, 0);
        load.close();
        assert!(!load.status().available);
        let err = load.enter("ocr").err().unwrap();
        assert_eq!(err.code, AGENT_UNAVAILABLE);
        assert!(err.retryable);
    }

    #[test]
    fn test_result_accessors() {
        let ok = AgentResult::success(serde_json::json!({"k": 1}), 0.8);
        assert!(ok.is_success());
        assert_eq!(ok.confidence(), Some(0.8));
        assert!(ok.error().is_none());

        let failed: AgentResult = Err(ProcessingError::fatal("INVALID", "bad")).into();
        assert!(!failed.is_success());
        assert_eq!(failed.confidence(), None);
        assert_eq!(failed.output(), &AgentOutput::default());
    }
}
