//! 阶段转移策略（数据驱动的转移表）
//!
//! 每个目标阶段一行：下一阶段、置信度阈值、默认 Agent 类型。
//! 人工 next_stage 覆盖优先于表；旁路状态（human_review / error）在表里没有后继，只能人工离开。

use std::collections::HashMap;

use crate::core::{AgentType, ProcessingStage};

/// 转移表中的一行
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageRule {
    /// 从该阶段出发的主链后继
    pub next: Option<ProcessingStage>,
    /// 以该阶段为目标时，结果需要达到的最低置信度
    pub threshold: f64,
    /// 以该阶段为目标时的默认 Agent
    pub default_agent: Option<AgentType>,
}

/// 阶段转移策略：纯函数，不持有任何运行时状态
#[derive(Debug, Clone)]
pub struct StagePolicy {
    rules: HashMap<ProcessingStage, StageRule>,
}

impl Default for StagePolicy {
    fn default() -> Self {
        use AgentType::*;
        use ProcessingStage::*;

        let table = [
            (Initial, Some(Uploaded), 0.0, None),
            (Uploaded, Some(Classified), 0.5, Some(Document)),
            (Classified, Some(OcrProcessed), 0.7, Some(Classification)),
            (OcrProcessed, Some(DataExtracted), 0.6, Some(Ocr)),
            (DataExtracted, Some(ValidationNeeded), 0.75, Some(Extraction)),
            (ValidationNeeded, Some(Completed), 0.8, Some(Document)),
            (Completed, None, 0.0, Some(Document)),
            (HumanReview, None, 0.0, Some(Feedback)),
            (Error, None, 0.0, None),
        ];

        let rules = table
            .into_iter()
            .map(|(stage, next, threshold, default_agent)| {
                (
                    stage,
                    StageRule {
                        next,
                        threshold,
                        default_agent,
                    },
                )
            })
            .collect();

        Self { rules }
    }
}

impl StagePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// 覆盖部分阶段的置信度阈值（配置 [pipeline.confidence_thresholds]）
    pub fn with_thresholds(mut self, overrides: &HashMap<ProcessingStage, f64>) -> Self {
        for (stage, threshold) in overrides {
            if let Some(rule) = self.rules.get_mut(stage) {
                rule.threshold = threshold.clamp(0.0, 1.0);
            }
        }
        self
    }

    /// 下一步的目标阶段：人工覆盖优先，否则沿主链；completed 与旁路状态无自动后继
    pub fn next_stage(
        &self,
        current: ProcessingStage,
        manual: Option<ProcessingStage>,
    ) -> Option<ProcessingStage> {
        if current.is_terminal() {
            return None;
        }
        manual.or_else(|| self.rules.get(&current).and_then(|r| r.next))
    }

    pub fn threshold(&self, stage: ProcessingStage) -> f64 {
        self.rules.get(&stage).map(|r| r.threshold).unwrap_or(0.0)
    }

    pub fn default_agent(&self, stage: ProcessingStage) -> Option<AgentType> {
        self.rules.get(&stage).and_then(|r| r.default_agent)
    }

    /// 可作为人工 next_stage 的目标：必须有默认 Agent 负责
    pub fn accepts_target(&self, stage: ProcessingStage) -> bool {
        self.default_agent(stage).is_some()
    }
}
