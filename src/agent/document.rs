//! 文档 Agent
//!
//! 负责流水线两端：上传校验（类型 / 大小 / 内容）、纯文本文档的 OCR 直通、
//! 抽取结果的必填字段校验、以及完成时按记录类型归档。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::collaborators::{detect_language, required_fields};
use crate::agent::{Agent, AgentLoad, AgentOptions, AgentOutput, AgentResult, AgentStatus};
use crate::config::ValidationSection;
use crate::core::{AgentType, Document, ProcessingError, ProcessingStage, INVALID_DOCUMENT};

pub struct DocumentAgent {
    allowed_mime_types: Vec<String>,
    max_document_bytes: usize,
    load: AgentLoad,
}

impl DocumentAgent {
    pub fn new(validation: &ValidationSection) -> Self {
        Self {
            allowed_mime_types: validation.allowed_mime_types.clone(),
            max_document_bytes: validation.max_document_bytes,
            load: AgentLoad::default(),
        }
    }

    fn invalid(message: String, details: Value) -> AgentResult {
        AgentResult::failure(ProcessingError::fatal(INVALID_DOCUMENT, message).with_details(details))
    }

    fn validate_upload(&self, document: &Document) -> AgentResult {
        if document.file_name.trim().is_empty() {
            return Self::invalid("document has no file name".into(), json!({}));
        }
        if !self.allowed_mime_types.iter().any(|m| m == &document.mime_type) {
            return Self::invalid(
                format!("unsupported mime type '{}'", document.mime_type),
                json!({ "mime_type": document.mime_type, "allowed": self.allowed_mime_types }),
            );
        }
        if document.content.is_empty() && document.attribute_str("text").is_none() {
            return Self::invalid("document is empty".into(), json!({ "file_name": document.file_name }));
        }
        if document.size() > self.max_document_bytes {
            return Self::invalid(
                format!("document exceeds {} bytes", self.max_document_bytes),
                json!({ "size_bytes": document.size() }),
            );
        }

        AgentResult::success(
            json!({
                "validated": true,
                "size_bytes": document.size(),
                "source": document.source,
            }),
            1.0,
        )
    }

    fn passthrough_text(&self, document: &Document) -> AgentResult {
        let text = String::from_utf8_lossy(&document.content).into_owned();
        if text.trim().is_empty() {
            return Self::invalid("text document is empty".into(), json!({}));
        }
        let language = detect_language(&text);
        AgentResult::success(json!({ "text": text, "language": language }), 1.0)
    }

    /// 置信度 = 必填字段覆盖率
    fn check_fields(&self, document: &Document) -> AgentResult {
        let document_type = document.attribute_str("document_type").unwrap_or("unknown");
        let fields = document.attributes.get("fields").and_then(Value::as_object);
        let required = required_fields(document_type);

        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|f| !fields.is_some_and(|m| m.contains_key(*f)))
            .collect();
        let confidence = if required.is_empty() {
            1.0
        } else {
            (required.len() - missing.len()) as f64 / required.len() as f64
        };

        AgentResult::Success(
            AgentOutput::default()
                .with_data(json!({ "missing_fields": missing }))
                .with_confidence(confidence)
                .with_metadata("validated_document_type", json!(document_type)),
        )
    }

    fn route(&self, document: &Document) -> AgentResult {
        let record_type = document.attribute_str("record_type").unwrap_or("unsorted");
        AgentResult::Success(
            AgentOutput::default()
                .with_data(json!({ "record_type": record_type, "routed": true }))
                .with_confidence(1.0)
                .with_metadata("routed_at", json!(chrono::Utc::now())),
        )
    }
}

#[async_trait]
impl Agent for DocumentAgent {
    fn name(&self) -> &str {
        "document"
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Document
    }

    fn can_handle(&self, stage: ProcessingStage, document: &Document) -> bool {
        match stage {
            ProcessingStage::Uploaded
            | ProcessingStage::ValidationNeeded
            | ProcessingStage::Completed => true,
            ProcessingStage::OcrProcessed => document.mime_type.starts_with("text/"),
            _ => false,
        }
    }

    async fn process(&self, document: &Document, options: &AgentOptions) -> AgentResult {
        let _guard = match self.load.enter(self.name()) {
            Ok(guard) => guard,
            Err(e) => return AgentResult::failure(e),
        };
        match options.stage {
            ProcessingStage::Uploaded => self.validate_upload(document),
            ProcessingStage::OcrProcessed => self.passthrough_text(document),
            ProcessingStage::ValidationNeeded => self.check_fields(document),
            ProcessingStage::Completed => self.route(document),
            other => AgentResult::failure(ProcessingError::fatal(
                "UNSUPPORTED_STAGE",
                format!("document agent cannot process stage '{other}'"),
            )),
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
    use crate::core::{DocumentProcessingState, Priority};
    use std::time::Duration;

    fn options(stage: ProcessingStage, doc: &Document) -> AgentOptions {
        AgentOptions {
            stage,
            timeout: Duration::from_secs(5),
            required_confidence: 0.5,
            state: DocumentProcessingState::new("doc-1".into(), doc.clone(), Priority::Normal, chrono::Utc::now()),
        }
    }

    fn agent() -> DocumentAgent {
        DocumentAgent::new(&ValidationSection::default())
    }

    #[tokio::test]
    async fn test_rejects_unsupported_mime_type_without_retry() {
        let doc = Document::new("macro.xlsm", "application/vnd.ms-excel").with_content(vec![1]);
        let result = agent().process(&doc, &options(ProcessingStage::Uploaded, &doc)).await;
        let err = result.error().unwrap();
        assert_eq!(err.code, INVALID_DOCUMENT);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_accepts_pdf_upload() {
        let doc = Document::new("claim.pdf", "application/pdf").with_content(b"%PDF-1.7".to_vec());
        let result = agent().process(&doc, &options(ProcessingStage::Uploaded, &doc)).await;
        assert!(result.is_success());
        assert_eq!(result.confidence(), Some(1.0));
    }

    #[tokio::test]
    async fn test_field_coverage_drives_confidence() {
        let doc = Document::new("claim.pdf", "application/pdf")
            .with_attribute("document_type", json!("claim_form"))
            .with_attribute("fields", json!({ "policy_number": "12.345.678" }));
        let result = agent().process(&doc, &options(ProcessingStage::ValidationNeeded, &doc)).await;
        assert_eq!(result.confidence(), Some(0.5));
        assert_eq!(result.output().data.as_ref().unwrap()["missing_fields"], json!(["document_date"]));
    }

    #[test]
    fn test_only_text_documents_bypass_ocr() {
        let agent = agent();
        assert!(agent.can_handle(ProcessingStage::OcrProcessed, &Document::new("a.txt", "text/plain")));
        assert!(!agent.can_handle(ProcessingStage::OcrProcessed, &Document::new("a.pdf", "application/pdf")));
        assert!(!agent.can_handle(ProcessingStage::Classified, &Document::new("a.txt", "text/plain")));
    }
}
