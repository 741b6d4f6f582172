//! 错误类型
//!
//! ProcessingError 是记录在历史与状态里的结构化错误，retryable 是引擎决定重试还是终止的唯一依据；
//! EngineError 是控制面（submit / restore 等）的返回错误。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ProcessingStage;

pub const AGENT_TIMEOUT: &str = "AGENT_TIMEOUT";
pub const AGENT_PANICKED: &str = "AGENT_PANICKED";
pub const NO_AGENT: &str = "NO_AGENT";
pub const STUCK_TIMEOUT: &str = "STUCK_TIMEOUT";
pub const INVALID_DOCUMENT: &str = "INVALID_DOCUMENT";
pub const COLLABORATOR_FAILED: &str = "COLLABORATOR_FAILED";

/// 单步处理失败的结构化描述
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ProcessingError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub retryable: bool,
}

impl ProcessingError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable,
        }
    }

    pub fn retryable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, true)
    }

    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, false)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn timeout(agent: &str, secs: f64) -> Self {
        Self::retryable(AGENT_TIMEOUT, format!("agent '{agent}' did not answer within {secs:.1}s"))
    }

    pub fn no_agent(stage: ProcessingStage) -> Self {
        Self::fatal(NO_AGENT, format!("no registered agent can handle stage '{stage}'"))
    }
}

/// 外部协作方（OCR 后端、分类器、抽取器、复核队列）报告的错误
#[derive(Error, Debug, Clone)]
pub enum CollaboratorError {
    /// 暂时性失败，可以重试
    #[error("transient failure: {0}")]
    Transient(String),

    /// 输入被拒绝，重试无意义
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_) | CollaboratorError::Unavailable(_))
    }

    pub fn into_processing(self, code: &str) -> ProcessingError {
        let retryable = self.is_retryable();
        ProcessingError::new(code, self.to_string(), retryable)
    }
}

impl From<CollaboratorError> for ProcessingError {
    fn from(err: CollaboratorError) -> Self {
        err.into_processing(COLLABORATOR_FAILED)
    }
}

/// 引擎控制面错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document already tracked: {0}")]
    DuplicateDocument(String),

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("stage '{0}' cannot be used as a manual target")]
    InvalidStage(ProcessingStage),

    #[error("config error: {0}")]
    Config(String),
}
