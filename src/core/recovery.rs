//! 重试与升级策略
//!
//! 根据一步的 AgentResult 决定：终止（error）、重试、升级人工复核、完成或推进到下一阶段。
//! 判定顺序固定：不可重试或预算耗尽 → 重试 → 低置信度升级 → 完成 → 推进。

use crate::agent::AgentResult;
use crate::core::{ProcessingError, ProcessingStage};

/// 一步结束后的决策
#[derive(Debug, Clone, PartialEq)]
pub enum StepDecision {
    /// 冻结在 error，停止自动调度
    Fail {
        error: ProcessingError,
        retry_count: u32,
    },
    /// 等待 retry_delay 后重跑同一目标阶段
    Retry {
        error: ProcessingError,
        retry_count: u32,
    },
    /// 成功但置信度不足，转人工复核（不是失败）
    Escalate { confidence: f64, threshold: f64 },
    /// 目标阶段为 completed，流水线结束
    Complete,
    /// 推进到目标阶段并立即调度下一步
    Advance(ProcessingStage),
}

/// 重试策略：只关心重试预算
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// 预算是否还有剩余
    pub fn has_budget(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    pub fn decide(
        &self,
        result: &AgentResult,
        target: ProcessingStage,
        retry_count: u32,
        threshold: f64,
    ) -> StepDecision {
        match result {
            AgentResult::Failure { error, .. } => {
                if !error.retryable || !self.has_budget(retry_count) {
                    return StepDecision::Fail {
                        error: error.clone(),
                        retry_count,
                    };
                }
                let retry_count = retry_count + 1;
                if retry_count >= self.max_retries {
                    StepDecision::Fail {
                        error: error.clone(),
                        retry_count,
                    }
                } else {
                    StepDecision::Retry {
                        error: error.clone(),
                        retry_count,
                    }
                }
            }
            AgentResult::Success(output) => match output.confidence {
                Some(confidence) if confidence < threshold => {
                    StepDecision::Escalate { confidence, threshold }
                }
                _ if target == ProcessingStage::Completed => StepDecision::Complete,
                _ => StepDecision::Advance(target),
            },
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentOutput;

    fn failure(retryable: bool) -> AgentResult {
        AgentResult::failure(ProcessingError::new("OCR_TIMEOUT", "ocr backend timed out", retryable))
    }

    fn success(confidence: f64) -> AgentResult {
        AgentResult::Success(AgentOutput::default().with_confidence(confidence))
    }

    #[test]
    fn test_non_retryable_fails_immediately() {
        let policy = RetryPolicy::new(3);
        let decision = policy.decide(&failure(false), ProcessingStage::Uploaded, 0, 0.5);
        assert!(matches!(decision, StepDecision::Fail { retry_count: 0, .. }));
    }

    #[test]
    fn test_retryable_failures_consume_budget() {
        let policy = RetryPolicy::new(3);
        let stage = ProcessingStage::OcrProcessed;
        assert!(matches!(
            policy.decide(&failure(true), stage, 0, 0.6),
            StepDecision::Retry { retry_count: 1, .. }
        ));
        assert!(matches!(
            policy.decide(&failure(true), stage, 1, 0.6),
            StepDecision::Retry { retry_count: 2, .. }
        ));
        // 第三次失败用尽预算
        assert!(matches!(
            policy.decide(&failure(true), stage, 2, 0.6),
            StepDecision::Fail { retry_count: 3, .. }
        ));
        assert!(matches!(
            policy.decide(&failure(true), stage, 3, 0.6),
            StepDecision::Fail { retry_count: 3, .. }
        ));
    }

    #[test]
    fn test_low_confidence_escalates_even_on_success() {
        let policy = RetryPolicy::new(3);
        let decision = policy.decide(&success(0.4), ProcessingStage::Classified, 0, 0.7);
        assert_eq!(
            decision,
            StepDecision::Escalate {
                confidence: 0.4,
                threshold: 0.7
            }
        );
    }

    #[test]
    fn test_low_confidence_on_final_step_still_escalates() {
        let policy = RetryPolicy::new(3);
        let decision = policy.decide(&success(0.1), ProcessingStage::Completed, 0, 0.2);
        assert!(matches!(decision, StepDecision::Escalate { .. }));
    }

    #[test]
    fn test_success_advances_or_completes() {
        let policy = RetryPolicy::new(3);
        assert_eq!(
            policy.decide(&success(0.95), ProcessingStage::Classified, 0, 0.7),
            StepDecision::Advance(ProcessingStage::Classified)
        );
        assert_eq!(
            policy.decide(&AgentResult::Success(AgentOutput::default()), ProcessingStage::Completed, 0, 0.9),
            StepDecision::Complete
        );
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let policy = RetryPolicy::new(0);
        assert!(matches!(
            policy.decide(&failure(true), ProcessingStage::Uploaded, 0, 0.0),
            StepDecision::Fail { retry_count: 0, .. }
        ));
    }
}
