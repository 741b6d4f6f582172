//! 外部协作方接口与本地实现
//!
//! OCR 后端、分类器、抽取器、人工复核队列都是引擎之外的系统，这里只定义接口；
//! 本地实现（关键词分类、纯文本 OCR、正则抽取、内存复核队列）供二进制与测试使用。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::core::{CollaboratorError, Document, DocumentId, ProcessingStage};

#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    pub language: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub document_type: String,
    /// 归档到的记录类型（claim / policy / invoice ...）
    pub record_type: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub fields: Map<String, Value>,
    pub confidence: f64,
}

/// 交给人工复核的请求
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewRequest {
    pub ticket: String,
    pub document_id: DocumentId,
    pub stage: ProcessingStage,
    pub reason: String,
    pub document_type: Option<String>,
    pub requested_at: DateTime<Utc>,
}

#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn extract_text(&self, document: &Document) -> Result<OcrOutput, CollaboratorError>;
}

#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;
    async fn classify(&self, document: &Document) -> Result<Classification, CollaboratorError>;
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;
    async fn extract(&self, document: &Document) -> Result<Extraction, CollaboratorError>;
}

#[async_trait]
pub trait ReviewQueue: Send + Sync {
    /// 入队，返回复核单号
    async fn enqueue(&self, request: ReviewRequest) -> Result<String, CollaboratorError>;
}

/// 各文档类型必须具备的字段
pub fn required_fields(document_type: &str) -> &'static [&'static str] {
    match document_type {
        "claim_form" => &["policy_number", "document_date"],
        "accident_report" => &["policy_number", "document_date"],
        "invoice" => &["amount_chf", "document_date"],
        "policy" => &["policy_number"],
        "medical_report" => &["ahv_number", "document_date"],
        _ => &[],
    }
}

/// 识别语言：按常见虚词计数（de / fr / it / en）
pub fn detect_language(text: &str) -> Option<String> {
    const MARKERS: [(&str, &[&str]); 4] = [
        ("de", &["der", "die", "und", "das", "nicht", "mit"]),
        ("fr", &["le", "la", "et", "les", "des", "avec"]),
        ("it", &["il", "di", "che", "della", "per", "con"]),
        ("en", &["the", "and", "of", "with", "for", "is"]),
    ];
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    MARKERS
        .iter()
        .map(|(lang, markers)| {
            let hits = words.iter().filter(|w| markers.contains(&w.as_str())).count();
            (*lang, hits)
        })
        .filter(|(_, hits)| *hits > 0)
        .max_by_key(|(_, hits)| *hits)
        .map(|(lang, _)| lang.to_string())
}

/// 文本来源：文件名、邮件主题、已有文本
fn searchable_text(document: &Document) -> String {
    let mut text = document.file_name.replace(['_', '-'], " ");
    for key in ["subject", "text"] {
        if let Some(value) = document.attribute_str(key) {
            text.push(' ');
            text.push_str(value);
        }
    }
    text.to_lowercase()
}

/// 文档类型、记录类型、关键词
const KEYWORD_RULES: &[(&str, &str, &[&str])] = &[
    (
        "claim_form",
        "claim",
        &["schadenmeldung", "schadenanzeige", "sinistre", "sinistro", "claim", "schaden"],
    ),
    ("accident_report", "claim", &["unfallmeldung", "unfall", "accident", "infortunio"]),
    (
        "medical_report",
        "claim",
        &["arztbericht", "rapport médical", "medical report", "rapporto medico", "diagnose"],
    ),
    ("invoice", "invoice", &["rechnung", "facture", "fattura", "invoice", "quittung"]),
    (
        "policy",
        "policy",
        &["versicherungspolice", "police", "policy", "polizza", "contrat d'assurance"],
    ),
    (
        "correspondence",
        "correspondence",
        &["kündigung", "résiliation", "disdetta", "brief", "lettre", "letter"],
    ),
];

/// 关键词分类器（德 / 法 / 意 / 英的保险术语）
pub struct KeywordClassifier {
    rules: &'static [(&'static str, &'static str, &'static [&'static str])],
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self {
            rules: KEYWORD_RULES,
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword-classifier"
    }

    async fn classify(&self, document: &Document) -> Result<Classification, CollaboratorError> {
        let text = searchable_text(document);
        let mut scored: Vec<(usize, &str, &str)> = self
            .rules
            .iter()
            .map(|(doc_type, record_type, keywords)| {
                let hits = keywords.iter().filter(|k| text.contains(*k)).count();
                (hits, *doc_type, *record_type)
            })
            .filter(|(hits, _, _)| *hits > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let Some(&(hits, document_type, record_type)) = scored.first() else {
            return Ok(Classification {
                document_type: "unknown".into(),
                record_type: "unsorted".into(),
                confidence: 0.2,
            });
        };

        let mut confidence = (0.6 + 0.1 * (hits as f64 - 1.0)).min(0.95);
        // 并列第一说明文本有歧义
        if scored.get(1).is_some_and(|second| second.0 == hits) {
            confidence -= 0.2;
        }

        Ok(Classification {
            document_type: document_type.into(),
            record_type: record_type.into(),
            confidence,
        })
    }
}

/// 纯文本 OCR：text/* 直接解码；其它类型只接受上游已附带的文本层（attributes.text）
#[derive(Debug, Default)]
pub struct PlainTextOcr;

#[async_trait]
impl OcrBackend for PlainTextOcr {
    fn name(&self) -> &str {
        "plain-text-ocr"
    }

    async fn extract_text(&self, document: &Document) -> Result<OcrOutput, CollaboratorError> {
        let text = if document.mime_type.starts_with("text/") {
            String::from_utf8_lossy(&document.content).into_owned()
        } else if let Some(layer) = document.attribute_str("text") {
            layer.to_string()
        } else {
            return Err(CollaboratorError::Rejected(format!(
                "no text layer available for {}",
                document.mime_type
            )));
        };

        if text.trim().is_empty() {
            return Err(CollaboratorError::Rejected("document contains no text".into()));
        }

        Ok(OcrOutput {
            language: detect_language(&text),
            text,
            confidence: 0.99,
        })
    }
}

/// 正则抽取器：保单号、理赔号、AHV 号、CHF 金额、日期
pub struct PatternExtractor {
    policy_number: Regex,
    claim_number: Regex,
    ahv_number: Regex,
    amount_chf: Regex,
    date: Regex,
}

impl PatternExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            policy_number: Regex::new(
                r"(?i)(?:police|policy|polizza|policen)[^\d\n]{0,20}(\d{2}\.\d{3}\.\d{3}|\d{6,10})",
            )?,
            claim_number: Regex::new(
                r"(?i)(?:schaden-?nr\.?|schadennummer|claim\s+(?:no\.?|number)|sinistre\s+n°|sinistro\s+n\.?)\s*[:#]?\s*([A-Z0-9][A-Z0-9\-/]{3,20})",
            )?,
            ahv_number: Regex::new(r"\b756\.\d{4}\.\d{4}\.\d{2}\b")?,
            amount_chf: Regex::new(r"(?i)(?:CHF|Fr\.)\s*([0-9][0-9']*(?:[.,]\d{2})?)")?,
            date: Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b")?,
        })
    }

    pub fn extract_fields(&self, text: &str) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(c) = self.policy_number.captures(text) {
            fields.insert("policy_number".into(), Value::String(c[1].to_string()));
        }
        if let Some(c) = self.claim_number.captures(text) {
            fields.insert("claim_number".into(), Value::String(c[1].to_string()));
        }
        if let Some(m) = self.ahv_number.find(text) {
            fields.insert("ahv_number".into(), Value::String(m.as_str().to_string()));
        }
        if let Some(c) = self.amount_chf.captures(text) {
            let normalized = c[1].replace('\'', "").replace(',', ".");
            if let Ok(amount) = normalized.parse::<f64>() {
                fields.insert("amount_chf".into(), serde_json::json!(amount));
            }
        }
        if let Some(c) = self.date.captures(text) {
            let (day, month, year) = (&c[1], &c[2], &c[3]);
            if let Some(date) = chrono::NaiveDate::from_ymd_opt(
                year.parse().unwrap_or(0),
                month.parse().unwrap_or(0),
                day.parse().unwrap_or(0),
            ) {
                fields.insert("document_date".into(), Value::String(date.to_string()));
            }
        }
        fields
    }
}

#[async_trait]
impl Extractor for PatternExtractor {
    fn name(&self) -> &str {
        "pattern-extractor"
    }

    async fn extract(&self, document: &Document) -> Result<Extraction, CollaboratorError> {
        let text = document
            .attribute_str("text")
            .ok_or_else(|| CollaboratorError::Rejected("document has no OCR text".into()))?;
        let fields = self.extract_fields(text);

        let document_type = document.attribute_str("document_type").unwrap_or("unknown");
        let required = required_fields(document_type);
        let confidence = if required.is_empty() {
            if fields.is_empty() { 0.5 } else { 0.8 }
        } else {
            let found = required.iter().filter(|f| fields.contains_key(**f)).count();
            found as f64 / required.len() as f64
        };

        Ok(Extraction { fields, confidence })
    }
}

/// 内存复核队列：请求经 mpsc 交给外部消费者
pub struct InMemoryReviewQueue {
    tx: mpsc::UnboundedSender<ReviewRequest>,
}

impl InMemoryReviewQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReviewRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ReviewQueue for InMemoryReviewQueue {
    async fn enqueue(&self, request: ReviewRequest) -> Result<String, CollaboratorError> {
        let ticket = request.ticket.clone();
        self.tx
            .send(request)
            .map_err(|_| CollaboratorError::Unavailable("review queue consumer is gone".into()))?;
        Ok(ticket)
    }
}
