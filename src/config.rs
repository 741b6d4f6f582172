//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CLAIMFLOW__*` 覆盖（双下划线表示嵌套，如 `CLAIMFLOW__ENGINE__MAX_RETRIES=5`）。
//! AppConfig 是可序列化的原始配置；EngineConfig 是校验过的运行时配置（Duration、强类型键）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{AgentType, EngineError, Priority, ProcessingStage};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub pipeline: PipelineSection,
    pub agents: AgentsSection,
    pub validation: ValidationSection,
}

/// [engine] 段：重试、卡死检测、并发
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub default_priority: Priority,
    /// 超过该时长未推进且不在执行中的文档视为卡死
    pub stuck_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// 同时执行的步骤上限，排队时按优先级放行
    pub max_concurrent_steps: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            default_priority: Priority::Normal,
            stuck_timeout_secs: 300,
            sweep_interval_secs: 60,
            max_concurrent_steps: 4,
        }
    }
}

/// [pipeline] 段：阶段 → 置信度阈值（覆盖内置表）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PipelineSection {
    pub confidence_thresholds: HashMap<String, f64>,
}

/// [agents] 段：按 Agent 类型的超时（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentsSection {
    pub default_timeout_secs: u64,
    pub timeouts_secs: HashMap<String, u64>,
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            timeouts_secs: HashMap::from([("ocr".to_string(), 120), ("extraction".to_string(), 60)]),
        }
    }
}

/// [validation] 段：上传校验
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationSection {
    pub max_document_bytes: usize,
    pub allowed_mime_types: Vec<String>,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            max_document_bytes: 20 * 1024 * 1024,
            allowed_mime_types: vec![
                "application/pdf".into(),
                "image/png".into(),
                "image/jpeg".into(),
                "image/tiff".into(),
                "text/plain".into(),
            ],
        }
    }
}

/// 引擎运行时配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub default_priority: Priority,
    pub confidence_thresholds: HashMap<ProcessingStage, f64>,
    pub default_agent_timeout: Duration,
    pub agent_timeouts: HashMap<AgentType, Duration>,
    pub stuck_timeout: Duration,
    pub sweep_interval: Duration,
    pub max_concurrent_steps: usize,
}

impl EngineConfig {
    /// 校验并转换；未知阶段或 Agent 类型视为配置错误
    pub fn from_app(cfg: &AppConfig) -> Result<Self, EngineError> {
        let confidence_thresholds = cfg
            .pipeline
            .confidence_thresholds
            .iter()
            .map(|(stage, threshold)| -> Result<(ProcessingStage, f64), EngineError> {
                let stage = stage.parse::<ProcessingStage>().map_err(EngineError::Config)?;
                if !(0.0..=1.0).contains(threshold) {
                    return Err(EngineError::Config(format!(
                        "confidence threshold for '{stage}' must be within 0..=1, got {threshold}"
                    )));
                }
                Ok((stage, *threshold))
            })
            .collect::<Result<HashMap<_, _>, EngineError>>()?;

        let agent_timeouts = cfg
            .agents
            .timeouts_secs
            .iter()
            .map(|(agent, secs)| -> Result<(AgentType, Duration), EngineError> {
                let agent = agent.parse::<AgentType>().map_err(EngineError::Config)?;
                Ok((agent, Duration::from_secs(*secs)))
            })
            .collect::<Result<HashMap<_, _>, EngineError>>()?;

        Ok(Self {
            max_retries: cfg.engine.max_retries,
            retry_delay: Duration::from_millis(cfg.engine.retry_delay_ms),
            default_priority: cfg.engine.default_priority,
            confidence_thresholds,
            default_agent_timeout: Duration::from_secs(cfg.agents.default_timeout_secs.max(1)),
            agent_timeouts,
            stuck_timeout: Duration::from_secs(cfg.engine.stuck_timeout_secs),
            sweep_interval: Duration::from_secs(cfg.engine.sweep_interval_secs.max(1)),
            max_concurrent_steps: cfg.engine.max_concurrent_steps.max(1),
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            default_priority: Priority::Normal,
            confidence_thresholds: HashMap::new(),
            default_agent_timeout: Duration::from_secs(30),
            agent_timeouts: HashMap::from([
                (AgentType::Ocr, Duration::from_secs(120)),
                (AgentType::Extraction, Duration::from_secs(60)),
            ]),
            stuck_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            max_concurrent_steps: 4,
        }
    }
}

/// 从 config 目录加载配置，环境变量 CLAIMFLOW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CLAIMFLOW__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CLAIMFLOW")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
