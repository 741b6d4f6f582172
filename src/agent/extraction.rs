//! 抽取 Agent：调用外部抽取器，产出结构化 fields

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::{Agent, AgentLoad, AgentOptions, AgentOutput, AgentResult, AgentStatus, Extractor};
use crate::core::{AgentType, Document, ProcessingStage};

pub struct ExtractionAgent {
    extractor: Arc<dyn Extractor>,
    load: AgentLoad,
}

impl ExtractionAgent {
    pub fn new(extractor: Arc<dyn Extractor>) -> Self {
        Self {
            extractor,
            load: AgentLoad::default(),
        }
    }
}

#[async_trait]
impl Agent for ExtractionAgent {
    fn name(&self) -> &str {
        "extraction"
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Extraction
    }

    fn can_handle(&self, stage: ProcessingStage, _document: &Document) -> bool {
        stage == ProcessingStage::DataExtracted
    }

    async fn process(&self, document: &Document, _options: &AgentOptions) -> AgentResult {
        let _guard = match self.load.enter(self.name()) {
            Ok(guard) => guard,
            Err(e) => return AgentResult::failure(e),
        };
        match self.extractor.extract(document).await {
            Ok(extraction) => {
                let field_count = extraction.fields.len();
                AgentResult::Success(
                    AgentOutput::default()
                        .with_data(json!({ "fields": Value::Object(extraction.fields) }))
                        .with_confidence(extraction.confidence)
                        .with_metadata("extracted_field_count", json!(field_count)),
                )
            }
            Err(e) => AgentResult::failure(e.into_processing("EXTRACTION_FAILED")),
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
    use crate::agent::PatternExtractor;
    use crate::core::{DocumentProcessingState, Priority};
    use std::time::Duration;

    #[tokio::test]
    async fn test_missing_text_is_not_retried() {
        let agent = ExtractionAgent::new(Arc::new(PatternExtractor::new().unwrap()));
        let doc = Document::new("claim.pdf", "application/pdf");
        let options = AgentOptions {
            stage: ProcessingStage::DataExtracted,
            timeout: Duration::from_secs(5),
            required_confidence: 0.75,
            state: DocumentProcessingState::new("doc-1".into(), doc.clone(), Priority::Normal, chrono::Utc::now()),
        };
        let result = agent.process(&doc, &options).await;
        let err = result.error().unwrap();
        assert_eq!(err.code, "EXTRACTION_FAILED");
        assert!(!err.retryable);
    }
}
