//! 处理历史账本：只追加、不修改
//!
//! 每个流水线步骤一条记录（阶段、Agent、起止时间、成功与否、结果或错误），用于审计与卡死检测。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{AgentType, ProcessingError, ProcessingStage};

/// 一步的产出：成功时的数据与置信度，或结构化错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    },
    Failed {
        error: ProcessingError,
    },
}

/// 一条历史记录，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingHistoryEntry {
    /// 该步的目标阶段
    pub stage: ProcessingStage,
    pub agent: AgentType,
    /// 具体 Agent 实例名（同类型可有多个实现）
    pub agent_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: StepOutcome,
}

impl ProcessingHistoryEntry {
    pub fn success(&self) -> bool {
        matches!(self.outcome, StepOutcome::Succeeded { .. })
    }

    pub fn error(&self) -> Option<&ProcessingError> {
        match &self.outcome {
            StepOutcome::Failed { error } => Some(error),
            StepOutcome::Succeeded { .. } => None,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// 账本本体：只暴露追加与只读访问
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessingHistory {
    entries: Vec<ProcessingHistoryEntry>,
}

impl ProcessingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: ProcessingHistoryEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ProcessingHistoryEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessingHistoryEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&ProcessingHistoryEntry> {
        self.entries.last()
    }

    /// 各步目标阶段（含失败的尝试）
    pub fn stages(&self) -> Vec<ProcessingStage> {
        self.entries.iter().map(|e| e.stage).collect()
    }

    /// 成功步骤的阶段序列
    pub fn successful_stages(&self) -> Vec<ProcessingStage> {
        self.entries
            .iter()
            .filter(|e| e.success())
            .map(|e| e.stage)
            .collect()
    }

    /// 末尾连续失败次数
    pub fn trailing_failures(&self) -> usize {
        self.entries.iter().rev().take_while(|e| !e.success()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(stage: ProcessingStage, ok: bool) -> ProcessingHistoryEntry {
        let now = Utc::now();
        ProcessingHistoryEntry {
            stage,
            agent: AgentType::Ocr,
            agent_name: "ocr".into(),
            started_at: now,
            finished_at: now + chrono::Duration::milliseconds(15),
            outcome: if ok {
                StepOutcome::Succeeded {
                    data: None,
                    confidence: Some(0.9),
                }
            } else {
                StepOutcome::Failed {
                    error: ProcessingError::retryable("OCR_TIMEOUT", "slow"),
                }
            },
        }
    }

    #[test]
    fn test_ledger_counts_trailing_failures() {
        let mut history = ProcessingHistory::new();
        history.append(entry(ProcessingStage::Classified, true));
        history.append(entry(ProcessingStage::OcrProcessed, false));
        history.append(entry(ProcessingStage::OcrProcessed, false));

        assert_eq!(history.len(), 3);
        assert_eq!(history.trailing_failures(), 2);
        assert_eq!(history.successful_stages(), vec![ProcessingStage::Classified]);
        assert_eq!(history.last().unwrap().error().unwrap().code, "OCR_TIMEOUT");
        assert_eq!(history.last().unwrap().duration_ms(), 15);
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(entry(ProcessingStage::Uploaded, false)).unwrap();
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["outcome"]["error"]["code"], "OCR_TIMEOUT");
        assert_eq!(json["stage"], "uploaded");
    }
}
