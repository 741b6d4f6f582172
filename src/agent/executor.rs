//! Agent 执行器
//!
//! 按 AgentType 施加超时；调用跑在独立的 tokio 任务里，panic 与超时都转成结构化 ProcessingError，
//! 永远不会冒泡到引擎。每次调用输出一行结构化审计日志（JSON）。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::agent::{Agent, AgentOptions, AgentResult};
use crate::core::{AgentType, Document, ProcessingError, AGENT_PANICKED};

/// Agent 执行器：超时、panic 隔离、审计
#[derive(Debug, Clone)]
pub struct AgentExecutor {
    default_timeout: Duration,
    timeouts: HashMap<AgentType, Duration>,
}

impl AgentExecutor {
    pub fn new(default_timeout: Duration, timeouts: HashMap<AgentType, Duration>) -> Self {
        Self {
            default_timeout,
            timeouts,
        }
    }

    pub fn timeout_for(&self, agent_type: AgentType) -> Duration {
        self.timeouts
            .get(&agent_type)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// 调用 Agent；超时返回可重试的 AGENT_TIMEOUT，panic 返回可重试的 AGENT_PANICKED
    pub async fn invoke(
        &self,
        agent: Arc<dyn Agent>,
        document: Document,
        options: AgentOptions,
    ) -> AgentResult {
        let start = Instant::now();
        let agent_name = agent.name().to_string();
        let document_id = options.state.document_id.clone();
        let stage = options.stage;
        let limit = options.timeout;

        let handle = tokio::spawn(async move { agent.process(&document, &options).await });
        let abort = handle.abort_handle();

        let (result, outcome) = match timeout(limit, handle).await {
            Ok(Ok(result)) => {
                let outcome = if result.is_success() { "ok" } else { "error" };
                (result, outcome)
            }
            Ok(Err(join_err)) => {
                let message = if join_err.is_panic() {
                    format!("agent '{agent_name}' panicked")
                } else {
                    format!("agent '{agent_name}' task was cancelled")
                };
                (
                    AgentResult::failure(ProcessingError::retryable(AGENT_PANICKED, message)),
                    "panic",
                )
            }
            Err(_) => {
                abort.abort();
                (
                    AgentResult::failure(ProcessingError::timeout(&agent_name, limit.as_secs_f64())),
                    "timeout",
                )
            }
        };

        let audit = serde_json::json!({
            "event": "agent_audit",
            "document_id": document_id,
            "stage": stage.as_str(),
            "agent": agent_name,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "confidence": result.confidence(),
            "error_code": result.error().map(|e| e.code.clone()),
        });
        tracing::info!(audit = %audit, "agent");

        result
    }
}

impl Default for AgentExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), HashMap::new())
    }
}
