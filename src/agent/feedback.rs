//! 反馈 / 人工复核 Agent
//!
//! 当人工把下一阶段指定为 human_review 时，把文档交给复核队列并返回复核单号。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::{Agent, AgentLoad, AgentOptions, AgentResult, AgentStatus, ReviewQueue, ReviewRequest};
use crate::core::{AgentType, Document, ProcessingStage};

pub struct FeedbackAgent {
    queue: Arc<dyn ReviewQueue>,
    load: AgentLoad,
}

impl FeedbackAgent {
    pub fn new(queue: Arc<dyn ReviewQueue>) -> Self {
        Self {
            queue,
            load: AgentLoad::default(),
        }
    }
}

#[async_trait]
impl Agent for FeedbackAgent {
    fn name(&self) -> &str {
        "feedback"
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Feedback
    }

    fn can_handle(&self, stage: ProcessingStage, _document: &Document) -> bool {
        stage == ProcessingStage::HumanReview
    }

    async fn process(&self, document: &Document, options: &AgentOptions) -> AgentResult {
        let _guard = match self.load.enter(self.name()) {
            Ok(guard) => guard,
            Err(e) => return AgentResult::failure(e),
        };
        let state = &options.state;
        let reason = state
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| format!("review requested at stage '{}'", state.current_stage));
        let request = ReviewRequest {
            ticket: format!("review_{}", uuid::Uuid::new_v4()),
            document_id: state.document_id.clone(),
            stage: state.current_stage,
            reason,
            document_type: document.attribute_str("document_type").map(str::to_string),
            requested_at: chrono::Utc::now(),
        };

        match self.queue.enqueue(request).await {
            Ok(ticket) => AgentResult::success(json!({ "review_ticket": ticket }), 1.0),
            Err(e) => AgentResult::failure(e.into_processing("REVIEW_QUEUE_FAILED")),
        }
    }

    fn status(&self) -> AgentStatus {
        self.load.status()
    }

    async fn shutdown(&self) {
        self.load.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::InMemoryReviewQueue;
    use crate::core::{DocumentProcessingState, Priority};
    use std::time::Duration;

    #[tokio::test]
    async fn test_feedback_agent_enqueues_review() {
        let (queue, mut rx) = InMemoryReviewQueue::new();
        let agent = FeedbackAgent::new(Arc::new(queue));
        let doc = Document::new("claim.pdf", "application/pdf").with_attribute("document_type", json!("claim_form"));
        let mut state = DocumentProcessingState::new("doc-7".into(), doc.clone(), Priority::High, chrono::Utc::now());
        state.current_stage = ProcessingStage::Classified;
        let options = AgentOptions {
            stage: ProcessingStage::HumanReview,
            timeout: Duration::from_secs(5),
            required_confidence: 0.0,
            state,
        };

        let result = agent.process(&doc, &options).await;
        assert!(result.is_success());
        let request = rx.try_recv().unwrap();
        assert_eq!(request.document_id, "doc-7");
        assert_eq!(request.stage, ProcessingStage::Classified);
        assert_eq!(request.document_type.as_deref(), Some("claim_form"));
        assert_eq!(result.output().data.as_ref().unwrap()["review_ticket"], json!(request.ticket));
    }
}
