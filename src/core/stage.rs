//! 流水线阶段、优先级与 Agent 能力标签
//!
//! 正向链：initial → uploaded → classified → ocr_processed → data_extracted → validation_needed → completed；
//! human_review / error 为旁路状态，只能通过人工 next_stage 或 reset 回到主链。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 文档处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Initial,
    Uploaded,
    Classified,
    OcrProcessed,
    DataExtracted,
    ValidationNeeded,
    Completed,
    /// 低置信度升级，等待人工决定
    HumanReview,
    /// 终止错误，等待 reset
    Error,
}

impl ProcessingStage {
    /// 正向主链（按顺序）
    pub const CANONICAL: [ProcessingStage; 7] = [
        ProcessingStage::Initial,
        ProcessingStage::Uploaded,
        ProcessingStage::Classified,
        ProcessingStage::OcrProcessed,
        ProcessingStage::DataExtracted,
        ProcessingStage::ValidationNeeded,
        ProcessingStage::Completed,
    ];

    pub const ALL: [ProcessingStage; 9] = [
        ProcessingStage::Initial,
        ProcessingStage::Uploaded,
        ProcessingStage::Classified,
        ProcessingStage::OcrProcessed,
        ProcessingStage::DataExtracted,
        ProcessingStage::ValidationNeeded,
        ProcessingStage::Completed,
        ProcessingStage::HumanReview,
        ProcessingStage::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Initial => "initial",
            ProcessingStage::Uploaded => "uploaded",
            ProcessingStage::Classified => "classified",
            ProcessingStage::OcrProcessed => "ocr_processed",
            ProcessingStage::DataExtracted => "data_extracted",
            ProcessingStage::ValidationNeeded => "validation_needed",
            ProcessingStage::Completed => "completed",
            ProcessingStage::HumanReview => "human_review",
            ProcessingStage::Error => "error",
        }
    }

    /// 旁路状态：不会被自动调度推进
    pub fn is_escape(&self) -> bool {
        matches!(self, ProcessingStage::HumanReview | ProcessingStage::Error)
    }

    pub fn is_terminal(&self) -> bool {
        *self == ProcessingStage::Completed
    }

    /// 在主链中的位置；旁路状态返回 None
    pub fn canonical_index(&self) -> Option<usize> {
        Self::CANONICAL.iter().position(|s| s == self)
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown processing stage: {s}"))
    }
}

/// 文档优先级：只升不降
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Priority {
    /// 上调一级，到 Urgent 后保持不变
    pub fn raised(self) -> Self {
        match self {
            Priority::Low => Priority::Normal,
            Priority::Normal => Priority::High,
            Priority::High | Priority::Urgent => Priority::Urgent,
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Agent 能力标签：既用于按阶段找默认 Agent，也用于 can_handle 过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Document,
    Classification,
    Ocr,
    Extraction,
    Feedback,
}

impl AgentType {
    pub const ALL: [AgentType; 5] = [
        AgentType::Document,
        AgentType::Classification,
        AgentType::Ocr,
        AgentType::Extraction,
        AgentType::Feedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Document => "document",
            AgentType::Classification => "classification",
            AgentType::Ocr => "ocr",
            AgentType::Extraction => "extraction",
            AgentType::Feedback => "feedback",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown agent type: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_only_goes_up() {
        assert_eq!(Priority::Low.raised(), Priority::Normal);
        assert_eq!(Priority::High.raised(), Priority::Urgent);
        assert_eq!(Priority::Urgent.raised(), Priority::Urgent);
        assert!(Priority::Low < Priority::Urgent);
    }

    #[test]
    fn test_default_priority_is_normal() {
        assert_eq!(Priority::default(), Priority::Normal);
        let parsed: Priority = serde_json::from_str("\"normal\"").unwrap();
        assert_eq!(parsed, Priority::default());
    }

    #[test]
    fn test_stage_parse_and_serde_agree() {
        for stage in ProcessingStage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage.as_str()));
            assert_eq!(stage.as_str().parse::<ProcessingStage>().unwrap(), stage);
        }
        assert!("archived".parse::<ProcessingStage>().is_err());
    }

    #[test]
    fn test_escape_states() {
        assert!(ProcessingStage::HumanReview.is_escape());
        assert!(ProcessingStage::Error.is_escape());
        assert!(!ProcessingStage::Completed.is_escape());
        assert_eq!(ProcessingStage::HumanReview.canonical_index(), None);
        assert_eq!(ProcessingStage::Completed.canonical_index(), Some(6));
    }
}
