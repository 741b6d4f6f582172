//! 引擎构建器：统一的引擎初始化逻辑
//!
//! 二进制与测试共用同一条装配路径：配置 → 时钟 → 注册表 → Agent。

use std::sync::Arc;

use crate::agent::{
    Agent, AgentRegistry, ClassificationAgent, DocumentAgent, ExtractionAgent, FeedbackAgent,
    KeywordClassifier, OcrAgent, PatternExtractor, PlainTextOcr, ReviewQueue,
};
use crate::config::{AppConfig, EngineConfig};
use crate::core::{Clock, CoordinationEngine, EngineError, SystemClock};

/// 引擎构建器
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    registry: Option<Arc<AgentRegistry>>,
    agents: Vec<Arc<dyn Agent>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            registry: None,
            agents: Vec::new(),
        }
    }

    /// 从原始配置构建（校验阈值与超时表）
    pub fn from_app(app: &AppConfig) -> Result<Self, EngineError> {
        Ok(Self::new(EngineConfig::from_app(app)?))
    }

    /// 注入时钟（测试用 ManualClock）
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 共享一个已有的注册表
    pub fn with_registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 按调用顺序注册；顺序即 can_handle 冲突时的优先级
    pub fn with_agent(mut self, agent: impl Agent + 'static) -> Self {
        self.agents.push(Arc::new(agent));
        self
    }

    pub fn with_agent_arc(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// 注册内置 Agent 与本地协作方实现。DocumentAgent 在前，纯文本文档的 OCR 阶段由它直通
    pub fn with_builtin_agents(
        self,
        app: &AppConfig,
        review_queue: Arc<dyn ReviewQueue>,
    ) -> Result<Self, EngineError> {
        let extractor = PatternExtractor::new()
            .map_err(|e| EngineError::Config(format!("invalid extraction pattern: {e}")))?;
        Ok(self
            .with_agent(DocumentAgent::new(&app.validation))
            .with_agent(ClassificationAgent::new(Arc::new(KeywordClassifier::default())))
            .with_agent(OcrAgent::new(Arc::new(PlainTextOcr)))
            .with_agent(ExtractionAgent::new(Arc::new(extractor)))
            .with_agent(FeedbackAgent::new(review_queue)))
    }

    pub async fn build(self) -> CoordinationEngine {
        let registry = self.registry.unwrap_or_default();
        for agent in self.agents {
            registry.register_arc(agent).await;
        }
        let agent_types = registry.agent_types().await;
        tracing::info!(
            agents = ?agent_types,
            max_retries = self.config.max_retries,
            max_concurrent_steps = self.config.max_concurrent_steps,
            "Coordination engine ready"
        );
        CoordinationEngine::from_parts(self.config, registry, self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::InMemoryReviewQueue;
    use crate::core::AgentType;

    #[tokio::test]
    async fn test_builtin_agents_are_registered_in_order() {
        let app = AppConfig::default();
        let (queue, _rx) = InMemoryReviewQueue::new();
        let engine = EngineBuilder::from_app(&app)
            .unwrap()
            .with_builtin_agents(&app, Arc::new(queue))
            .unwrap()
            .build()
            .await;
        assert_eq!(
            engine.registry().agent_types().await,
            vec![
                AgentType::Document,
                AgentType::Classification,
                AgentType::Ocr,
                AgentType::Extraction,
                AgentType::Feedback,
            ]
        );
    }
}
