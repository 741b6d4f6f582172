//! 文档与处理状态
//!
//! DocumentProcessingState 由引擎独占；对外只返回克隆快照。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{
    AgentType, Priority, ProcessingError, ProcessingHistory, ProcessingHistoryEntry,
    ProcessingStage,
};

pub type DocumentId = String;

/// 文档来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    #[default]
    Upload,
    Email,
}

/// 待处理文档：原始内容 + 各 Agent 逐步补充的属性
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,
    pub file_name: String,
    pub mime_type: String,
    #[serde(default)]
    pub source: DocumentSource,
    /// 原始字节不进入快照序列化
    #[serde(skip)]
    pub content: Vec<u8>,
    /// Agent 产出合并到这里（document_type、text、fields ...）
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Document {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<DocumentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = content;
        self
    }

    pub fn with_source(mut self, source: DocumentSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_attribute(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// 合并 Agent 的 data：对象按键合并，其它值挂在阶段名下
    pub fn merge_data(&mut self, stage: ProcessingStage, data: &Value) {
        match data {
            Value::Object(map) => {
                for (k, v) in map {
                    self.attributes.insert(k.clone(), v.clone());
                }
            }
            Value::Null => {}
            other => {
                self.attributes.insert(stage.as_str().to_string(), other.clone());
            }
        }
    }
}

/// 单个在途文档的完整处理状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentProcessingState {
    pub document_id: DocumentId,
    pub document: Document,
    pub current_stage: ProcessingStage,
    /// 人工覆盖的下一阶段，优先于转移表
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_stage: Option<ProcessingStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<AgentType>,
    #[serde(default)]
    pub history: ProcessingHistory,
    pub priority: Priority,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProcessingError>,
    pub last_updated: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// 人工操作计数；步骤结束时若已变化则不再应用该步决策
    #[serde(default)]
    pub revision: u64,
}

impl DocumentProcessingState {
    pub fn new(document_id: DocumentId, document: Document, priority: Priority, now: DateTime<Utc>) -> Self {
        Self {
            document_id,
            document,
            current_stage: ProcessingStage::Initial,
            next_stage: None,
            assigned_agent: None,
            history: ProcessingHistory::new(),
            priority,
            retry_count: 0,
            error: None,
            last_updated: now,
            start_time: now,
            metadata: Map::new(),
            revision: 0,
        }
    }

    /// 追加历史并刷新 last_updated
    pub fn record(&mut self, entry: ProcessingHistoryEntry) {
        self.last_updated = entry.finished_at;
        self.history.append(entry);
    }

    pub fn merge_metadata(&mut self, metadata: &Map<String, Value>) {
        for (k, v) in metadata {
            self.metadata.insert(k.clone(), v.clone());
        }
    }

    pub fn is_active(&self) -> bool {
        !self.current_stage.is_terminal()
    }

    /// 人工操作后调用
    pub fn touch_manual(&mut self, now: DateTime<Utc>) {
        self.revision += 1;
        self.last_updated = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_data_object_and_scalar() {
        let mut doc = Document::new("claim.pdf", "application/pdf");
        doc.merge_data(ProcessingStage::Classified, &json!({"document_type": "claim_form"}));
        doc.merge_data(ProcessingStage::OcrProcessed, &json!("Schadenmeldung"));
        doc.merge_data(ProcessingStage::DataExtracted, &Value::Null);

        assert_eq!(doc.attribute_str("document_type"), Some("claim_form"));
        assert_eq!(doc.attribute_str("ocr_processed"), Some("Schadenmeldung"));
        assert_eq!(doc.attributes.len(), 2);
    }

    #[test]
    fn test_snapshot_skips_raw_content() {
        let doc = Document::new("scan.png", "image/png").with_content(vec![1, 2, 3]);
        let state = DocumentProcessingState::new("doc-1".into(), doc, Priority::High, Utc::now());
        let json = serde_json::to_value(&state).unwrap();
        assert!(json["document"].get("content").is_none());
        assert_eq!(json["current_stage"], "initial");
        assert_eq!(json["priority"], "high");
    }
}
