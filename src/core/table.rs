//! 在途文档表
//!
//! 外层 RwLock 只保护「文档 id → 条目」的映射；每个文档的状态各自一把 Mutex，
//! 不同文档的步骤互不串行，状态查询也不会被某个文档的写入整体阻塞。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::core::{DocumentId, DocumentProcessingState, EngineError};

pub type StateCell = Arc<Mutex<DocumentProcessingState>>;

#[derive(Default)]
pub struct DocumentTable {
    docs: RwLock<HashMap<DocumentId, StateCell>>,
}

impl DocumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新增文档；id 已存在时返回 DuplicateDocument
    pub async fn insert(&self, state: DocumentProcessingState) -> Result<StateCell, EngineError> {
        let mut docs = self.docs.write().await;
        if docs.contains_key(&state.document_id) {
            return Err(EngineError::DuplicateDocument(state.document_id));
        }
        let id = state.document_id.clone();
        let cell = Arc::new(Mutex::new(state));
        docs.insert(id, Arc::clone(&cell));
        Ok(cell)
    }

    pub async fn get(&self, id: &str) -> Option<StateCell> {
        self.docs.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.docs.read().await.contains_key(id)
    }

    /// 克隆快照
    pub async fn snapshot(&self, id: &str) -> Option<DocumentProcessingState> {
        let cell = self.get(id).await?;
        let state = cell.lock().await;
        Some(state.clone())
    }

    /// 全部条目（拷贝出映射后再逐个加锁，不持有外层读锁）
    pub async fn cells(&self) -> Vec<(DocumentId, StateCell)> {
        self.docs
            .read()
            .await
            .iter()
            .map(|(id, cell)| (id.clone(), Arc::clone(cell)))
            .collect()
    }

    pub async fn snapshots(&self) -> Vec<DocumentProcessingState> {
        let mut out = Vec::new();
        for (_, cell) in self.cells().await {
            out.push(cell.lock().await.clone());
        }
        out
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Document, Priority};

    fn state(id: &str) -> DocumentProcessingState {
        DocumentProcessingState::new(
            id.into(),
            Document::new("claim.pdf", "application/pdf"),
            Priority::Normal,
            chrono::Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let table = DocumentTable::new();
        table.insert(state("doc-1")).await.unwrap();
        let err = table.insert(state("doc-1")).await.unwrap_err();
        assert_eq!(err, EngineError::DuplicateDocument("doc-1".into()));
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let table = DocumentTable::new();
        table.insert(state("doc-1")).await.unwrap();
        let mut snap = table.snapshot("doc-1").await.unwrap();
        snap.retry_count = 9;
        assert_eq!(table.snapshot("doc-1").await.unwrap().retry_count, 0);
        assert!(table.snapshot("missing").await.is_none());
    }
}
