//! OCR Agent：调用外部 OCR 后端，产出 text / language

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::{Agent, AgentLoad, AgentOptions, AgentOutput, AgentResult, AgentStatus, OcrBackend};
use crate::core::{AgentType, Document, ProcessingStage};

pub struct OcrAgent {
    backend: Arc<dyn OcrBackend>,
    load: AgentLoad,
}

impl OcrAgent {
    pub fn new(backend: Arc<dyn OcrBackend>) -> Self {
        Self {
            backend,
            load: AgentLoad::default(),
        }
    }
}

#[async_trait]
impl Agent for OcrAgent {
    fn name(&self) -> &str {
        "ocr"
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Ocr
    }

    fn can_handle(&self, stage: ProcessingStage, _document: &Document) -> bool {
        stage == ProcessingStage::OcrProcessed
    }

    async fn process(&self, document: &Document, _options: &AgentOptions) -> AgentResult {
        let _guard = match self.load.enter(self.name()) {
            Ok(guard) => guard,
            Err(e) => return AgentResult::failure(e),
        };
        match self.backend.extract_text(document).await {
            Ok(out) => AgentResult::Success(
                AgentOutput::default()
                    .with_data(json!({ "text": out.text, "language": out.language }))
                    .with_confidence(out.confidence)
                    .with_metadata("ocr_backend", json!(self.backend.name())),
            ),
            Err(e) => AgentResult::failure(e.into_processing("OCR_FAILED")),
        }
    }

    fn status(&self) -> AgentStatus {
        self.load.status()
    }

    async fn shutdown(&self) {
        self.load.close();
    }
}
