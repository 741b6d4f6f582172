//! 分类 Agent：调用外部分类器，产出 document_type / record_type 与置信度

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::{Agent, AgentLoad, AgentOptions, AgentOutput, AgentResult, AgentStatus, Classifier};
use crate::core::{AgentType, Document, ProcessingStage};

pub struct ClassificationAgent {
    classifier: Arc<dyn Classifier>,
    load: AgentLoad,
}

impl ClassificationAgent {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            load: AgentLoad::default(),
        }
    }
}

#[async_trait]
impl Agent for ClassificationAgent {
    fn name(&self) -> &str {
        "classification"
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Classification
    }

    fn can_handle(&self, stage: ProcessingStage, _document: &Document) -> bool {
        stage == ProcessingStage::Classified
    }

    async fn process(&self, document: &Document, _options: &AgentOptions) -> AgentResult {
        let _guard = match self.load.enter(self.name()) {
            Ok(guard) => guard,
            Err(e) => return AgentResult::failure(e),
        };
        match self.classifier.classify(document).await {
            Ok(c) => AgentResult::Success(
                AgentOutput::default()
                    .with_data(json!({
                        "document_type": c.document_type,
                        "record_type": c.record_type,
                    }))
                    .with_confidence(c.confidence)
                    .with_metadata("classifier", json!(self.classifier.name())),
            ),
            Err(e) => AgentResult::failure(e.into_processing("CLASSIFICATION_FAILED")),
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
    use crate::agent::KeywordClassifier;
    use crate::core::{DocumentProcessingState, Priority};
    use std::time::Duration;

    #[tokio::test]
    async fn test_classification_agent_emits_document_type() {
        let agent = ClassificationAgent::new(Arc::new(KeywordClassifier::default()));
        let doc = Document::new("Rechnung_Garage.pdf", "application/pdf");
        let options = AgentOptions {
            stage: ProcessingStage::Classified,
            timeout: Duration::from_secs(5),
            required_confidence: 0.7,
            state: DocumentProcessingState::new("doc-1".into(), doc.clone(), Priority::Normal, chrono::Utc::now()),
        };
        let result = agent.process(&doc, &options).await;
        let data = result.output().data.clone().unwrap();
        assert_eq!(data["document_type"], "invoice");
        assert_eq!(data["record_type"], "invoice");
        assert_eq!(result.output().metadata["classifier"], "keyword-classifier");
    }
}
