//! claimflow - 保险文档处理协调引擎
//!
//! 模块划分：
//! - **agent**: Agent trait、注册表、带超时的执行器、内置 Agent 与外部协作方接口
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 阶段与转移表、处理状态与历史、重试策略、步骤调度、协调引擎、卡死巡检、优雅关闭
//! - **observability**: tracing 初始化

pub mod agent;
pub mod config;
pub mod core;
pub mod observability;

pub use crate::core::{CoordinationEngine, EngineBuilder};
