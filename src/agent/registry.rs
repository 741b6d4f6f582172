//! Agent 注册表
//!
//! AgentType → Agent，一类一个实例；保留注册顺序作为 can_handle 冲突时的优先级。
//! 同类型重复注册会替换原实例但保留其位置。读写走 RwLock，解析时不会看到半初始化的表。

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::RwLock;

use crate::agent::{Agent, AgentStatus};
use crate::core::{AgentType, Document, ProcessingStage};

/// Agent 注册表：按注册顺序存储 Arc<dyn Agent>
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<Vec<Arc<dyn Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, agent: impl Agent + 'static) {
        self.register_arc(Arc::new(agent)).await;
    }

    pub async fn register_arc(&self, agent: Arc<dyn Agent>) {
        let mut agents = self.agents.write().await;
        let agent_type = agent.agent_type();
        match agents.iter_mut().find(|a| a.agent_type() == agent_type) {
            Some(slot) => {
                tracing::info!(agent = agent.name(), %agent_type, "Replacing registered agent");
                *slot = agent;
            }
            None => {
                tracing::debug!(agent = agent.name(), %agent_type, "Registered agent");
                agents.push(agent);
            }
        }
    }

    pub async fn get(&self, agent_type: AgentType) -> Option<Arc<dyn Agent>> {
        self.agents
            .read()
            .await
            .iter()
            .find(|a| a.agent_type() == agent_type)
            .cloned()
    }

    /// 解析负责某阶段的 Agent：先取第一个 can_handle 为真的（注册顺序），否则退回该阶段的默认类型
    pub async fn resolve(
        &self,
        stage: ProcessingStage,
        document: &Document,
        fallback: Option<AgentType>,
    ) -> Option<Arc<dyn Agent>> {
        let agents = self.agents.read().await;
        if let Some(agent) = agents.iter().find(|a| a.can_handle(stage, document)) {
            return Some(agent.clone());
        }
        let fallback = fallback?;
        agents.iter().find(|a| a.agent_type() == fallback).cloned()
    }

    pub async fn agent_types(&self) -> Vec<AgentType> {
        self.agents.read().await.iter().map(|a| a.agent_type()).collect()
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// (name, type, status) 列表
    pub async fn statuses(&self) -> Vec<(String, AgentType, AgentStatus)> {
        self.agents
            .read()
            .await
            .iter()
            .map(|a| (a.name().to_string(), a.agent_type(), a.status()))
            .collect()
    }

    /// 关闭所有 Agent（进程退出时）
    pub async fn shutdown_all(&self) {
        let agents: Vec<_> = self.agents.read().await.clone();
        join_all(agents.iter().map(|a| a.shutdown())).await;
        tracing::info!("Shut down {} agents", agents.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentResult, ScriptedAgent};

    #[tokio::test]
    async fn test_resolve_prefers_can_handle_in_registration_order() {
        let registry = AgentRegistry::new();
        registry
            .register(ScriptedAgent::new("doc", AgentType::Document).handles(&[ProcessingStage::OcrProcessed]))
            .await;
        registry.register(ScriptedAgent::new("ocr", AgentType::Ocr)).await;

        let doc = Document::new("notes.txt", "text/plain");
        let agent = registry
            .resolve(ProcessingStage::OcrProcessed, &doc, Some(AgentType::Ocr))
            .await
            .unwrap();
        assert_eq!(agent.name(), "doc");
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_default_type() {
        let registry = AgentRegistry::new();
        registry.register(ScriptedAgent::new("doc", AgentType::Document)).await;
        registry.register(ScriptedAgent::new("extract", AgentType::Extraction)).await;

        let doc = Document::new("claim.pdf", "application/pdf");
        let agent = registry
            .resolve(ProcessingStage::DataExtracted, &doc, Some(AgentType::Extraction))
            .await
            .unwrap();
        assert_eq!(agent.name(), "extract");
        assert!(registry
            .resolve(ProcessingStage::Classified, &doc, Some(AgentType::Classification))
            .await
            .is_none());
        assert!(registry.resolve(ProcessingStage::Error, &doc, None).await.is_none());
    }

    #[tokio::test]
    async fn test_reregister_replaces_in_place() {
        let registry = AgentRegistry::new();
        registry.register(ScriptedAgent::new("ocr-v1", AgentType::Ocr)).await;
        registry.register(ScriptedAgent::new("extract", AgentType::Extraction)).await;
        registry
            .register(ScriptedAgent::new("ocr-v2", AgentType::Ocr).with_default(AgentResult::success(serde_json::Value::Null, 1.0)))
            .await;

        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.agent_types().await, vec![AgentType::Ocr, AgentType::Extraction]);
        assert_eq!(registry.get(AgentType::Ocr).await.unwrap().name(), "ocr-v2");
    }

    #[tokio::test]
    async fn test_shutdown_all_closes_agents() {
        let registry = AgentRegistry::new();
        let agent = Arc::new(ScriptedAgent::new("ocr", AgentType::Ocr));
        registry.register_arc(agent.clone()).await;
        registry.shutdown_all().await;
        assert!(agent.is_shut_down());
        let statuses = registry.statuses().await;
        assert!(!statuses[0].2.available);
    }
}
